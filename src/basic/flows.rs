//! Post-solve quantities derived from network voltages.
use nalgebra::DVector;
use num_complex::Complex64;
use serde::Serialize;

use super::error::{PfResult, PowerFlowError};
use super::network::{Bus, Network};

/// Per-phase complex power entering a branch at each terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchFlow {
    pub branch: String,
    pub s_from: Vec<Complex64>,
    pub s_to: Vec<Complex64>,
}

impl BranchFlow {
    /// Power absorbed by the branch.
    pub fn loss(&self) -> Complex64 {
        self.s_from.iter().chain(&self.s_to).sum()
    }
}

/// Solved state of one bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusResult {
    pub bus: String,
    pub v: Vec<Complex64>,
    /// Generation delivered, per phase.
    pub s_gen: Vec<Complex64>,
    /// Load served at the solved voltage, per phase.
    pub s_load: Vec<Complex64>,
}

fn lookup<'a>(network: &'a Network, bus_id: &str) -> PfResult<&'a Bus> {
    network
        .bus(bus_id)
        .ok_or_else(|| PowerFlowError::UnknownBus(bus_id.to_string()))
}

/// Branch flows from the voltages currently stored on the network.
pub fn branch_flows(network: &Network) -> PfResult<Vec<BranchFlow>> {
    let mut out = Vec::with_capacity(network.branches().len());
    for br in network.branches() {
        let mut u = Vec::with_capacity(br.dim());
        for (bus_id, phases) in [(&br.bus0, &br.phases0), (&br.bus1, &br.phases1)] {
            let bus = lookup(network, bus_id)?;
            for p in phases.iter() {
                let k = bus.phases.index_of(*p).ok_or_else(|| PowerFlowError::PhaseMismatch {
                    component: format!("branch `{}`", br.id),
                    bus: bus_id.clone(),
                    phase: p.to_string(),
                })?;
                u.push(bus.v()[k]);
            }
        }
        let u = DVector::from_vec(u);
        let i = br.y() * &u;
        let s: Vec<Complex64> = u
            .iter()
            .zip(i.iter())
            .map(|(u, i)| u * i.conj())
            .collect();
        let (s_from, s_to) = s.split_at(br.phases0.len());
        out.push(BranchFlow {
            branch: br.id.clone(),
            s_from: s_from.to_vec(),
            s_to: s_to.to_vec(),
        });
    }
    Ok(out)
}

/// Bus results in bus order. De-energized buses serve no load.
pub fn bus_results(network: &Network) -> Vec<BusResult> {
    network
        .buses()
        .iter()
        .map(|bus| {
            let n = bus.phases.len();
            let mut s_load = vec![Complex64::new(0.0, 0.0); n];
            if bus.v().iter().any(|v| v.norm() > 0.0) {
                for z in network.zips_of(bus).filter(|z| z.in_service) {
                    s_load
                        .iter_mut()
                        .zip(z.s_drawn(bus.v(), &bus.phases))
                        .for_each(|(a, b)| *a += b);
                }
            }
            BusResult {
                bus: bus.id.clone(),
                v: bus.v().to_vec(),
                s_gen: network.s_gen(bus),
                s_load,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::network::*;
    use crate::basic::powerflow::solve;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_flows_balance_after_solve() {
        let mut net = Network::new();
        net.add_bus(Bus::balanced("a", BusType::Slack)).unwrap();
        net.add_bus(Bus::balanced("b", BusType::PQ)).unwrap();
        net.add_branch(Branch::balanced("ab", "a", "b", BranchKind::line(c(0.02, 0.06), 0.03)))
            .unwrap();
        net.add_gen(Generator::new("g", "a", vec![c(0.0, 0.0)])).unwrap();
        net.add_zip(Zip::constant_power("l", "b", &[c(0.4, 0.2)])).unwrap();
        assert!(solve(&mut net));

        let flows = branch_flows(&net).unwrap();
        assert_eq!(flows.len(), 1);
        let f = &flows[0];
        // Sending end carries the slack output, receiving end delivers the load.
        assert!((f.s_from[0] - net.gens()[0].s_requested()[0]).norm() < 1e-8);
        assert!((f.s_to[0] + c(0.4, 0.2)).norm() < 1e-8);
        assert!(f.loss().re > 0.0);

        let res = bus_results(&net);
        assert!((res[1].s_load[0] - c(0.4, 0.2)).norm() < 1e-12);
        assert!((res[0].s_gen[0] - f.s_from[0]).norm() < 1e-10);
    }

    #[test]
    fn test_results_serialize() {
        let mut net = Network::new();
        net.add_bus(Bus::balanced("a", BusType::Slack)).unwrap();
        net.add_bus(Bus::balanced("b", BusType::PQ)).unwrap();
        net.add_branch(Branch::balanced("ab", "a", "b", BranchKind::line(c(0.01, 0.1), 0.0)))
            .unwrap();
        net.add_gen(Generator::new("g", "a", vec![c(0.0, 0.0)])).unwrap();
        net.add_zip(Zip::constant_power("l", "b", &[c(0.3, 0.1)])).unwrap();
        assert!(solve(&mut net));

        let buses = serde_json::to_value(bus_results(&net)).unwrap();
        assert_eq!(buses[1]["bus"], "b");
        let p_load = buses[1]["s_load"][0][0].as_f64().unwrap();
        assert!((p_load - 0.3).abs() < 1e-12);
        let flows = serde_json::to_value(branch_flows(&net).unwrap()).unwrap();
        assert_eq!(flows[0]["branch"], "ab");
        assert_eq!(flows[0]["s_to"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_out_of_service_branch_carries_nothing() {
        let mut net = Network::new();
        net.add_bus(Bus::balanced("a", BusType::Slack)).unwrap();
        net.add_bus(Bus::balanced("b", BusType::PQ)).unwrap();
        let mut br = Branch::balanced("ab", "a", "b", BranchKind::line(c(0.01, 0.1), 0.0));
        br.in_service = false;
        net.add_branch(br).unwrap();
        let flows = branch_flows(&net).unwrap();
        assert_eq!(flows[0].loss(), c(0.0, 0.0));
    }
}
