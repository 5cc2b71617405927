use std::collections::HashSet;
use std::ops::Deref;

use nalgebra::DMatrix;
use num_complex::Complex64;
use tracing::{debug, trace};

use super::{PfBranch, PfBus, PowerFlowModel};
use crate::basic::error::PfResult;
use crate::basic::network::{Bus, BusType, Limit, Network};
use crate::basic::powerflow::PowerFlowConfig;

/// Scoped bus type override.
///
/// Change notifications are suppressed while the guard lives and every
/// coerced bus gets its declared type back on drop, on success and error alike.
struct TypeCoercion<'a> {
    network: &'a mut Network,
    saved: Vec<(usize, BusType)>,
}

impl<'a> TypeCoercion<'a> {
    fn new(network: &'a mut Network) -> Self {
        network.suppress_events();
        TypeCoercion {
            network,
            saved: Vec::new(),
        }
    }

    fn coerce(&mut self, idx: usize, to: BusType) {
        let bus = &mut self.network.buses_mut()[idx];
        self.saved.push((idx, bus.bus_type));
        bus.bus_type = to;
    }
}

impl Deref for TypeCoercion<'_> {
    type Target = Network;

    fn deref(&self) -> &Network {
        self.network
    }
}

impl Drop for TypeCoercion<'_> {
    fn drop(&mut self) {
        let buses = self.network.buses_mut();
        for (idx, bus_type) in self.saved.drain(..).rev() {
            buses[idx].bus_type = bus_type;
        }
        self.network.resume_events();
    }
}

/// Builds and validates a model from the in-service buses accepted by `include`.
///
/// PV and slack buses without an in-service generator are solved as PQ. With
/// `fixed_q_pv_as_pq`, so are PV buses whose generators all have a zero
/// reactive range. The network's declared bus types are left untouched.
pub fn build_model<F>(
    network: &mut Network,
    include: F,
    config: &PowerFlowConfig,
) -> PfResult<PowerFlowModel>
where
    F: Fn(&Bus) -> bool,
{
    let mut guard = TypeCoercion::new(network);

    for idx in 0..guard.buses().len() {
        let bus = &guard.buses()[idx];
        if !bus.in_service || !include(bus) {
            continue;
        }
        let coerce = match bus.bus_type() {
            BusType::PV | BusType::Slack if guard.n_in_service_gens(bus) == 0 => {
                debug!(
                    bus = %bus.id,
                    bus_type = ?bus.bus_type(),
                    "no in-service generator, solving as PQ"
                );
                true
            }
            BusType::PV
                if config.fixed_q_pv_as_pq
                    && guard
                        .gens_of(bus)
                        .filter(|g| g.in_service)
                        .all(|g| g.q_limit.is_zero_range()) =>
            {
                debug!(bus = %bus.id, "zero reactive range, solving as PQ");
                true
            }
            _ => false,
        };
        if coerce {
            guard.coerce(idx, BusType::PQ);
        }
    }

    let net: &Network = &guard;
    let mut model = PowerFlowModel::new();
    let mut selected = HashSet::new();

    for bus in net.buses().iter().filter(|b| b.in_service && include(b)) {
        let v = seed_voltage(bus, config.flat_start);
        let mut s_gen = net.s_gen_requested(bus);
        if config.flat_start && matches!(bus.bus_type(), BusType::PV | BusType::Slack) {
            s_gen.iter_mut().for_each(|s| s.im = 0.0);
        }

        let mut pf_bus = PfBus::new(bus.id.clone(), bus.bus_type(), bus.phases.clone(), &v, &s_gen);
        pf_bus.v_mag_setpoint = bus.v_mag_setpoint().to_vec();
        let n = bus.phases.len();
        let (mut y, mut i, mut s) = (
            DMatrix::zeros(n, n),
            DMatrix::zeros(n, n),
            DMatrix::zeros(n, n),
        );
        for zip in net.zips_of(bus).filter(|z| z.in_service) {
            y += &zip.y_const;
            i += &zip.i_const;
            s += &zip.s_const;
        }
        pf_bus.y_zip = y;
        pf_bus.i_zip = i;
        pf_bus.s_zip = s;
        let gens: Vec<_> = net.gens_of(bus).filter(|g| g.in_service).collect();
        pf_bus.inertia = gens.iter().map(|g| g.inertia).sum();
        pf_bus.q_limit = gens
            .iter()
            .map(|g| g.q_limit)
            .reduce(|a, b| a + b)
            .unwrap_or_else(Limit::unbounded);

        trace!(bus = %bus.id, bus_type = ?bus.bus_type(), "add model bus");
        model.add_bus(pf_bus)?;
        selected.insert(bus.id.as_str());
    }

    for br in net.branches().iter().filter(|b| b.in_service) {
        if !selected.contains(br.bus0.as_str()) || !selected.contains(br.bus1.as_str()) {
            continue;
        }
        model.add_branch(PfBranch {
            id: br.id.clone(),
            bus0: br.bus0.clone(),
            bus1: br.bus1.clone(),
            phases0: br.phases0.clone(),
            phases1: br.phases1.clone(),
            y: br.y(),
        });
    }

    model.validate()?;
    Ok(model)
}

/// Starting voltage for a bus, with setpoints applied.
fn seed_voltage(bus: &Bus, flat_start: bool) -> Vec<Complex64> {
    let de_energized = bus.v().iter().all(|v| v.norm() == 0.0);
    let base = if flat_start || de_energized {
        &bus.v_nom
    } else {
        bus.v()
    };
    bus.v_with_setpoints(base)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::basic::error::PowerFlowError;
    use crate::basic::network::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn radial() -> Network {
        let mut net = Network::new();
        net.add_bus(Bus::balanced("a", BusType::Slack)).unwrap();
        net.add_bus(Bus::balanced("b", BusType::PV)).unwrap();
        net.add_bus(Bus::balanced("c", BusType::PQ)).unwrap();
        net.add_branch(Branch::balanced("ab", "a", "b", BranchKind::line(c(0.01, 0.1), 0.0)))
            .unwrap();
        net.add_branch(Branch::balanced("bc", "b", "c", BranchKind::line(c(0.01, 0.1), 0.0)))
            .unwrap();
        net.add_gen(Generator::new("g", "a", vec![c(0.0, 0.0)])).unwrap();
        net.add_zip(Zip::constant_power("z", "c", &[c(0.4, 0.1)])).unwrap();
        net
    }

    #[test]
    fn test_build_is_idempotent() {
        let mut net = radial();
        let cfg = PowerFlowConfig::default();
        let m1 = build_model(&mut net, |_| true, &cfg).unwrap();
        let m2 = build_model(&mut net, |_| true, &cfg).unwrap();
        assert_eq!(m1.n_node(), m2.n_node());
        assert_eq!(m1.branches.len(), m2.branches.len());
        assert_eq!(m1.y.nnz(), m2.y.nnz());
        assert_eq!(m1.y.col_offsets(), m2.y.col_offsets());
        assert_eq!(m1.y.row_indices(), m2.y.row_indices());
    }

    #[test]
    fn test_pv_without_generator_is_coerced_and_restored() {
        let mut net = radial();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        net.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let model = build_model(&mut net, |_| true, &PowerFlowConfig::default()).unwrap();
        assert_eq!(model.bus("b").unwrap().bus_type, BusType::PQ);
        assert_eq!((model.n_pq, model.n_pv, model.n_sl), (2, 0, 1));
        assert_eq!(net.bus("b").unwrap().bus_type(), BusType::PV);
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_type_restored_on_error() {
        let mut net = radial();
        net.add_bus(Bus::balanced("d", BusType::Invalid)).unwrap();
        let err = build_model(&mut net, |_| true, &PowerFlowConfig::default()).unwrap_err();
        assert!(matches!(err, PowerFlowError::InvalidBusType { .. }));
        assert_eq!(net.bus("b").unwrap().bus_type(), BusType::PV);
        // Events flow again once the guard is gone.
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        net.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        net.set_bus_type("d", BusType::PQ).unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inclusion_predicate_and_out_of_service() {
        let mut net = radial();
        net.set_bus_in_service("c", false).unwrap();
        let model = build_model(&mut net, |b| b.id != "a", &PowerFlowConfig::default()).unwrap();
        assert_eq!(model.n_node(), 1);
        assert!(model.bus("a").is_none());
        assert!(model.bus("c").is_none());
        assert!(model.branches.is_empty());
    }

    #[test]
    fn test_fixed_q_policy() {
        let mut net = radial();
        net.add_gen(Generator::new("gb", "b", vec![c(0.2, 0.0)]).with_q_limit(0.0, 0.0))
            .unwrap();
        let model = build_model(&mut net, |_| true, &PowerFlowConfig::default()).unwrap();
        assert_eq!(model.n_pv, 1);

        let cfg = PowerFlowConfig {
            fixed_q_pv_as_pq: true,
            ..Default::default()
        };
        let model = build_model(&mut net, |_| true, &cfg).unwrap();
        assert_eq!(model.n_pv, 0);
        assert_eq!(net.bus("b").unwrap().bus_type(), BusType::PV);
    }

    #[test]
    fn test_zip_and_generation_aggregation() {
        let mut net = radial();
        net.add_zip(Zip::constant_power("z2", "c", &[c(0.1, 0.0)])).unwrap();
        let mut z3 = Zip::constant_power("z3", "c", &[c(5.0, 0.0)]);
        z3.in_service = false;
        net.add_zip(z3).unwrap();
        net.add_gen(Generator::new("gc", "c", vec![c(0.05, 0.01)]).with_inertia(2.0))
            .unwrap();
        let model = build_model(&mut net, |_| true, &PowerFlowConfig::default()).unwrap();
        let c_bus = model.bus("c").unwrap();
        assert!((c_bus.s_zip[(0, 0)] - c(0.5, 0.1)).norm() < 1e-12);
        assert_eq!(c_bus.nodes[0].s_gen, c(0.05, 0.01));
        assert_eq!(c_bus.inertia, 2.0);
    }
}
