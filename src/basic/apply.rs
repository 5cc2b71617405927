//! Writes solved model state back onto the network.
use num_complex::Complex64;
use tracing::trace;

use super::error::{PfResult, PowerFlowError};
use super::island::Island;
use super::model::{PfBus, PowerFlowModel};
use super::network::{BusType, Network, NetworkEvent};

/// Copies a converged model's voltages and generation onto `network`.
///
/// Every model bus gets its node voltages and has its unserved quantities
/// cleared. Slack buses split the node generation evenly over their in-service
/// generators; PV buses do the same for reactive power only, leaving each
/// generator's real power as requested. PQ generation is untouched.
///
/// Bus types and ids are checked before anything is written.
pub fn apply_model(network: &mut Network, model: &PowerFlowModel) -> PfResult<()> {
    let mut targets = Vec::with_capacity(model.buses.len());
    for pf_bus in &model.buses {
        if pf_bus.bus_type == BusType::Invalid {
            return Err(PowerFlowError::InvalidBusType {
                bus: pf_bus.id.clone(),
                bus_type: pf_bus.bus_type,
            });
        }
        let idx = network
            .bus_index(&pf_bus.id)
            .ok_or_else(|| PowerFlowError::UnknownBus(pf_bus.id.clone()))?;
        let n = network.buses()[idx].phases.len();
        if pf_bus.nodes.len() != n {
            return Err(PowerFlowError::DimensionMismatch {
                what: format!("solved voltage of bus `{}`", pf_bus.id),
                expected: n,
                rows: pf_bus.nodes.len(),
                cols: 1,
            });
        }
        targets.push(idx);
    }

    for (pf_bus, idx) in model.buses.iter().zip(targets) {
        let gens: Vec<usize> = network.buses()[idx]
            .gens
            .iter()
            .copied()
            .filter(|&g| network.gens()[g].in_service)
            .collect();

        let bus = &mut network.buses_mut()[idx];
        let zero = vec![Complex64::new(0.0, 0.0); bus.phases.len()];
        bus.v = pf_bus.nodes.iter().map(|n| n.v).collect();
        bus.s_gen_unserved = zero.clone();
        bus.s_zip_unserved = zero;
        trace!(bus = %pf_bus.id, "applied voltage");
        network.notify(NetworkEvent::VoltageChanged { bus: pf_bus.id.clone() });

        if !gens.is_empty() {
            share_generation(network, pf_bus, &gens);
        }
    }
    Ok(())
}

fn share_generation(network: &mut Network, pf_bus: &PfBus, gens: &[usize]) {
    let share = 1.0 / gens.len() as f64;
    let keep_p = match pf_bus.bus_type {
        BusType::Slack => false,
        BusType::PV => true,
        _ => return,
    };
    for &g in gens {
        let generator = &mut network.gens_mut()[g];
        for (s, node) in generator.s.iter_mut().zip(&pf_bus.nodes) {
            let solved = node.s_gen * share;
            *s = if keep_p { Complex64::new(s.re, solved.im) } else { solved };
        }
        let gen_id = generator.id.clone();
        network.notify(NetworkEvent::GenerationChanged { gen_id });
    }
}

/// Marks every bus of an unsupplied island as de-energized.
///
/// Voltages drop to zero and all requested generation and load is recorded
/// as unserved, load being evaluated at nominal voltage.
pub fn de_energize(network: &mut Network, island: &Island) {
    for id in &island.buses {
        let Some(idx) = network.bus_index(id) else {
            continue;
        };
        let bus = &network.buses()[idx];
        let gen_unserved = network.s_gen_requested(bus);
        let zip_unserved = network.s_zip_requested(bus);

        let bus = &mut network.buses_mut()[idx];
        bus.v = vec![Complex64::new(0.0, 0.0); bus.phases.len()];
        bus.s_gen_unserved = gen_unserved;
        bus.s_zip_unserved = zip_unserved;
        network.notify(NetworkEvent::VoltageChanged { bus: id.clone() });
    }
}
