use serde::{Deserialize, Serialize};
use tracing::debug;

use super::network::{Network, NetworkEvent};

/// A connected group of buses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Island {
    pub index: usize,
    /// Reachable from an in-service bus with an in-service generator.
    pub is_supplied: bool,
    /// Bus ids in traversal order.
    pub buses: Vec<String>,
}

/// Partitions the buses of `network` into islands.
///
/// Supplied islands are seeded first, from the buses of in-service generators
/// in generator insertion order. Remaining buses then seed unsupplied islands in
/// bus insertion order; an out-of-service bus always forms its own singleton.
/// Traversal crosses in-service branches in both directions and never enters an
/// out-of-service bus.
pub fn find_islands(network: &Network) -> Vec<Island> {
    let buses = network.buses();
    let n = buses.len();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for br in network.branches().iter().filter(|b| b.in_service) {
        if let (Some(i), Some(k)) = (network.bus_index(&br.bus0), network.bus_index(&br.bus1)) {
            adjacency[i].push(k);
            adjacency[k].push(i);
        }
    }

    let mut assigned: Vec<Option<usize>> = vec![None; n];
    let mut islands = Vec::new();

    let traverse = |seed: usize, index: usize, assigned: &mut Vec<Option<usize>>| {
        let mut members = Vec::new();
        let mut stack = vec![seed];
        while let Some(i) = stack.pop() {
            if assigned[i].is_some() || !buses[i].in_service {
                continue;
            }
            assigned[i] = Some(index);
            members.push(buses[i].id.clone());
            // Reverse so neighbours are visited in branch order.
            stack.extend(
                adjacency[i]
                    .iter()
                    .rev()
                    .filter(|&&k| assigned[k].is_none()),
            );
        }
        members
    };

    for g in network.gens().iter().filter(|g| g.in_service) {
        let Some(seed) = network.bus_index(&g.bus) else {
            continue;
        };
        if assigned[seed].is_some() || !buses[seed].in_service {
            continue;
        }
        let index = islands.len();
        let members = traverse(seed, index, &mut assigned);
        islands.push(Island {
            index,
            is_supplied: true,
            buses: members,
        });
    }

    for seed in 0..n {
        if assigned[seed].is_some() {
            continue;
        }
        let index = islands.len();
        let members = if buses[seed].in_service {
            traverse(seed, index, &mut assigned)
        } else {
            assigned[seed] = Some(index);
            vec![buses[seed].id.clone()]
        };
        islands.push(Island {
            index,
            is_supplied: false,
            buses: members,
        });
    }

    islands
}

impl Network {
    /// Runs island analysis and records each bus's island index.
    pub fn analyze_islands(&mut self) -> &[Island] {
        let islands = find_islands(self);
        for island in &islands {
            for id in &island.buses {
                if let Ok(bus) = self.bus_mut(id) {
                    bus.island = Some(island.index);
                }
            }
        }
        debug!(
            n_islands = islands.len(),
            n_supplied = islands.iter().filter(|i| i.is_supplied).count(),
            "island analysis"
        );
        self.islands = islands;
        self.notify(NetworkEvent::IslandsChanged);
        &self.islands
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use num_complex::Complex64;

    use super::*;
    use crate::basic::network::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn line(id: &str, a: &str, b: &str) -> Branch {
        Branch::balanced(id, a, b, BranchKind::line(c(0.01, 0.1), 0.0))
    }

    /// Six buses: {a, b} supplied, {c, d} cut off by an open branch, e out of
    /// service, f supplied by its own generator.
    fn mixed_network() -> Network {
        let mut net = Network::new();
        for (id, t) in [
            ("a", BusType::Slack),
            ("b", BusType::PQ),
            ("c", BusType::PQ),
            ("d", BusType::PQ),
            ("e", BusType::PQ),
            ("f", BusType::PV),
        ] {
            net.add_bus(Bus::balanced(id, t)).unwrap();
        }
        net.add_branch(line("ab", "a", "b")).unwrap();
        net.add_branch(line("cd", "c", "d")).unwrap();
        net.add_branch(line("be", "b", "e")).unwrap();
        let mut bc = line("bc", "b", "c");
        bc.in_service = false;
        net.add_branch(bc).unwrap();
        net.add_gen(Generator::new("g1", "a", vec![c(0.0, 0.0)])).unwrap();
        net.add_gen(Generator::new("g2", "f", vec![c(0.3, 0.0)])).unwrap();
        net.set_bus_in_service("e", false).unwrap();
        net
    }

    #[test]
    fn test_partition_is_exact() {
        let net = mixed_network();
        let islands = find_islands(&net);
        let mut seen = HashSet::new();
        for island in &islands {
            for b in &island.buses {
                assert!(seen.insert(b.clone()), "bus {} appears twice", b);
            }
        }
        let all: HashSet<String> = net.buses().iter().map(|b| b.id.clone()).collect();
        assert_eq!(seen, all);
        for (i, island) in islands.iter().enumerate() {
            assert_eq!(island.index, i);
        }
    }

    #[test]
    fn test_supply_classification() {
        let mut net = mixed_network();
        net.analyze_islands();
        let island_of = |id: &str| {
            let idx = net.bus(id).unwrap().island().unwrap();
            net.islands()[idx].clone()
        };
        assert!(island_of("a").is_supplied);
        assert_eq!(island_of("a").buses, vec!["a".to_string(), "b".to_string()]);
        assert!(island_of("f").is_supplied);
        assert!(!island_of("c").is_supplied);
        assert_eq!(island_of("c").buses.len(), 2);
        let e = island_of("e");
        assert!(!e.is_supplied);
        assert_eq!(e.buses, vec!["e".to_string()]);
        // Generator seeds come first, in generator order.
        assert_eq!(net.bus("a").unwrap().island(), Some(0));
        assert_eq!(net.bus("f").unwrap().island(), Some(1));
    }

    #[test]
    fn test_out_of_service_generator_does_not_supply() {
        let mut net = mixed_network();
        net.set_gen_in_service(1, false).unwrap();
        let islands = find_islands(&net);
        let f = islands
            .iter()
            .find(|i| i.buses.contains(&"f".to_string()))
            .unwrap();
        assert!(!f.is_supplied);
    }
}
