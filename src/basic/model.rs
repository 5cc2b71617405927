//! Solver-side nodal model of one island.
use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use tracing::debug;

use super::error::{PfResult, PowerFlowError};
use super::network::{BusType, Limit, Phase, Phases};

pub mod builder;

pub use builder::build_model;

/// One conductor of a model bus.
#[derive(Debug, Clone)]
pub struct PfNode {
    pub phase: Phase,
    /// Flat index, valid after [`PowerFlowModel::validate`].
    pub idx: usize,
    pub v: Complex64,
    /// Generation injected at this node.
    pub s_gen: Complex64,
}

/// Model-side bus: aggregated loads and generation plus its nodes.
#[derive(Debug, Clone)]
pub struct PfBus {
    pub id: String,
    pub bus_type: BusType,
    pub phases: Phases,
    pub v_mag_setpoint: Vec<f64>,
    pub y_zip: DMatrix<Complex64>,
    pub i_zip: DMatrix<Complex64>,
    pub s_zip: DMatrix<Complex64>,
    /// Summed rotational inertia of in-service generators.
    pub inertia: f64,
    /// Summed reactive bounds of in-service generators.
    pub q_limit: Limit<f64>,
    /// A PV bus pinned at a reactive bound; solved as PQ.
    pub q_limited: bool,
    pub nodes: Vec<PfNode>,
}

impl PfBus {
    pub fn new(
        id: impl Into<String>,
        bus_type: BusType,
        phases: Phases,
        v: &[Complex64],
        s_gen: &[Complex64],
    ) -> Self {
        let n = phases.len();
        let nodes = phases
            .iter()
            .zip(v.iter().zip(s_gen))
            .map(|(phase, (v, s))| PfNode {
                phase: *phase,
                idx: 0,
                v: *v,
                s_gen: *s,
            })
            .collect();
        PfBus {
            id: id.into(),
            bus_type,
            v_mag_setpoint: v.iter().map(|v| v.norm()).collect(),
            y_zip: DMatrix::zeros(n, n),
            i_zip: DMatrix::zeros(n, n),
            s_zip: DMatrix::zeros(n, n),
            inertia: 0.0,
            q_limit: Limit::unbounded(),
            q_limited: false,
            phases,
            nodes,
        }
    }

    /// Type used for bucketing.
    pub fn solve_type(&self) -> BusType {
        if self.q_limited && self.bus_type == BusType::PV {
            BusType::PQ
        } else {
            self.bus_type
        }
    }

    /// Total reactive generation over all nodes.
    pub fn q_gen(&self) -> f64 {
        self.nodes.iter().map(|n| n.s_gen.im).sum()
    }
}

#[derive(Debug, Clone)]
pub struct PfBranch {
    pub id: String,
    pub bus0: String,
    pub bus1: String,
    pub phases0: Phases,
    pub phases1: Phases,
    pub y: DMatrix<Complex64>,
}

/// Nodal model for one solve.
///
/// Flat node indices are bucketed PQ first, then PV, then slack. Each bucket
/// keeps bus insertion order and phase order.
#[derive(Debug, Clone)]
pub struct PowerFlowModel {
    pub buses: Vec<PfBus>,
    pub branches: Vec<PfBranch>,
    bus_lookup: HashMap<String, usize>,
    /// (bus, node) for each flat index.
    node_map: Vec<(usize, usize)>,
    pub y: CscMatrix<Complex64>,
    pub i_const: CscMatrix<Complex64>,
    pub s_const: CscMatrix<Complex64>,
    pub n_pq: usize,
    pub n_pv: usize,
    pub n_sl: usize,
}

impl Default for PowerFlowModel {
    fn default() -> Self {
        let empty = || CscMatrix::<Complex64>::from(&CooMatrix::<Complex64>::new(0, 0));
        PowerFlowModel {
            buses: Vec::new(),
            branches: Vec::new(),
            bus_lookup: HashMap::new(),
            node_map: Vec::new(),
            y: empty(),
            i_const: empty(),
            s_const: empty(),
            n_pq: 0,
            n_pv: 0,
            n_sl: 0,
        }
    }
}

impl PowerFlowModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bus(&mut self, bus: PfBus) -> PfResult<()> {
        if self.bus_lookup.contains_key(&bus.id) {
            return Err(PowerFlowError::DuplicateBus(bus.id));
        }
        self.bus_lookup.insert(bus.id.clone(), self.buses.len());
        self.buses.push(bus);
        Ok(())
    }

    pub fn add_branch(&mut self, branch: PfBranch) {
        self.branches.push(branch);
    }

    pub fn bus(&self, id: &str) -> Option<&PfBus> {
        self.bus_lookup.get(id).map(|&i| &self.buses[i])
    }

    pub fn n_node(&self) -> usize {
        self.node_map.len()
    }

    /// Number of non-slack nodes, i.e. rows of the mismatch.
    pub fn n_var(&self) -> usize {
        self.n_pq + self.n_pv
    }

    pub fn node(&self, idx: usize) -> &PfNode {
        let (b, k) = self.node_map[idx];
        &self.buses[b].nodes[k]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut PfNode {
        let (b, k) = self.node_map[idx];
        &mut self.buses[b].nodes[k]
    }

    /// Owning bus of a flat node index.
    pub fn node_bus(&self, idx: usize) -> &PfBus {
        &self.buses[self.node_map[idx].0]
    }

    pub fn v(&self) -> DVector<Complex64> {
        DVector::from_iterator(self.n_node(), (0..self.n_node()).map(|i| self.node(i).v))
    }

    pub fn s_gen(&self) -> DVector<Complex64> {
        DVector::from_iterator(self.n_node(), (0..self.n_node()).map(|i| self.node(i).s_gen))
    }

    /// Setpoint magnitude squared for each flat node.
    pub fn m2_setpoint(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n_node(),
            self.node_map.iter().map(|&(b, k)| {
                let m = self.buses[b].v_mag_setpoint[k];
                m * m
            }),
        )
    }

    pub fn set_v(&mut self, v: &DVector<Complex64>) {
        for (i, vi) in v.iter().enumerate() {
            self.node_mut(i).v = *vi;
        }
    }

    pub fn set_s_gen(&mut self, s: &DVector<Complex64>) {
        for (i, si) in s.iter().enumerate() {
            self.node_mut(i).s_gen = *si;
        }
    }

    /// Buckets nodes and assembles the sparse Y, constant-current and
    /// constant-power matrices.
    ///
    /// Can be called again after bus types change; previous indices are
    /// discarded.
    pub fn validate(&mut self) -> PfResult<()> {
        let mut pq = Vec::new();
        let mut pv = Vec::new();
        let mut sl = Vec::new();
        for (b, bus) in self.buses.iter().enumerate() {
            let bucket = match bus.solve_type() {
                BusType::PQ => &mut pq,
                BusType::PV => &mut pv,
                BusType::Slack => &mut sl,
                BusType::Invalid => {
                    return Err(PowerFlowError::InvalidBusType {
                        bus: bus.id.clone(),
                        bus_type: bus.bus_type,
                    });
                }
            };
            if bus.nodes.len() != bus.phases.len() || bus.v_mag_setpoint.len() != bus.phases.len() {
                return Err(PowerFlowError::DimensionMismatch {
                    what: format!("model bus `{}` nodes", bus.id),
                    expected: bus.phases.len(),
                    rows: bus.nodes.len(),
                    cols: bus.v_mag_setpoint.len(),
                });
            }
            bucket.extend((0..bus.nodes.len()).map(|k| (b, k)));
        }
        self.n_pq = pq.len();
        self.n_pv = pv.len();
        self.n_sl = sl.len();
        self.node_map = pq.into_iter().chain(pv).chain(sl).collect();
        for idx in 0..self.node_map.len() {
            self.node_mut(idx).idx = idx;
        }

        let n = self.n_node();
        let mut y = CooMatrix::new(n, n);
        let mut ic = CooMatrix::new(n, n);
        let mut sc = CooMatrix::new(n, n);
        let zero = Complex64::new(0.0, 0.0);

        for bus in &self.buses {
            let np = bus.phases.len();
            let zip_parts = [
                ("constant impedance", &bus.y_zip),
                ("constant current", &bus.i_zip),
                ("constant power", &bus.s_zip),
            ];
            for (what, m) in zip_parts {
                if m.shape() != (np, np) {
                    return Err(PowerFlowError::DimensionMismatch {
                        what: format!("bus `{}` {what}", bus.id),
                        expected: np,
                        rows: m.nrows(),
                        cols: m.ncols(),
                    });
                }
            }
            for i in 0..np {
                let ni = bus.nodes[i].idx;
                for k in i..np {
                    let nk = bus.nodes[k].idx;
                    let yik = bus.y_zip[(i, k)];
                    if yik != zero {
                        if i == k {
                            y.push(ni, ni, yik);
                        } else {
                            y.push(ni, ni, yik);
                            y.push(nk, nk, yik);
                            y.push(ni, nk, -yik);
                            y.push(nk, ni, -yik);
                        }
                    }
                    if bus.i_zip[(i, k)] != zero {
                        ic.push(ni, nk, bus.i_zip[(i, k)]);
                    }
                    if bus.s_zip[(i, k)] != zero {
                        sc.push(ni, nk, bus.s_zip[(i, k)]);
                    }
                }
            }
        }

        for br in &self.branches {
            let dim = br.phases0.len() + br.phases1.len();
            if br.y.shape() != (dim, dim) {
                return Err(PowerFlowError::DimensionMismatch {
                    what: format!("branch `{}` admittance", br.id),
                    expected: dim,
                    rows: br.y.nrows(),
                    cols: br.y.ncols(),
                });
            }
            let mut terminals = Vec::with_capacity(dim);
            for (bus_id, phases) in [(&br.bus0, &br.phases0), (&br.bus1, &br.phases1)] {
                let bus = self
                    .bus(bus_id)
                    .ok_or_else(|| PowerFlowError::UnknownBus(bus_id.clone()))?;
                for p in phases.iter() {
                    let k = bus.phases.index_of(*p).ok_or_else(|| PowerFlowError::PhaseMismatch {
                        component: format!("branch `{}`", br.id),
                        bus: bus_id.clone(),
                        phase: p.to_string(),
                    })?;
                    terminals.push(bus.nodes[k].idx);
                }
            }
            for i in 0..dim {
                let ni = terminals[i];
                y.push(ni, ni, br.y[(i, i)]);
                for k in (i + 1)..dim {
                    let nk = terminals[k];
                    y.push(ni, nk, br.y[(i, k)]);
                    y.push(nk, ni, br.y[(k, i)]);
                }
            }
        }

        self.y = CscMatrix::from(&y);
        self.i_const = CscMatrix::from(&ic);
        self.s_const = CscMatrix::from(&sc);
        debug!(
            n_pq = self.n_pq,
            n_pv = self.n_pv,
            n_sl = self.n_sl,
            nnz = self.y.nnz(),
            "model validated"
        );
        Ok(())
    }
}
