//! Component graph: buses, branches, generators and loads keyed by string id.
//!
//! Collections keep insertion order, which fixes the traversal order used by
//! island analysis and model assembly.
use std::collections::HashMap;
use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::error::{PfResult, PowerFlowError};
use super::island::Island;

pub mod branch;
pub mod bus;
pub mod generator;
pub mod units;
pub mod zip;

pub use branch::{Branch, BranchKind, admittance};
pub use bus::{Bus, BusType, Phase, Phases};
pub use generator::Generator;
pub use units::{Limit, Pair, PerUnitBase};
pub use zip::Zip;

/// Change notifications emitted by [`Network`] mutators.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    BusTypeChanged { bus: String, bus_type: BusType },
    BusServiceChanged { bus: String, in_service: bool },
    SetpointChanged { bus: String },
    VoltageChanged { bus: String },
    GenerationChanged { gen_id: String },
    BranchServiceChanged { branch: String, in_service: bool },
    IslandsChanged,
}

type Listener = Box<dyn Fn(&NetworkEvent) + Send + Sync>;

/// Registered change listeners. Not carried over by `Clone` or serde.
#[derive(Default)]
struct Listeners {
    callbacks: Vec<Listener>,
    suppressed: usize,
}

impl Clone for Listeners {
    fn clone(&self) -> Self {
        Listeners::default()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.callbacks.len())
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub base: PerUnitBase,
    buses: Vec<Bus>,
    branches: Vec<Branch>,
    gens: Vec<Generator>,
    zips: Vec<Zip>,
    #[serde(skip)]
    bus_lookup: HashMap<String, usize>,
    #[serde(skip)]
    pub(crate) islands: Vec<Island>,
    #[serde(skip)]
    listeners: Listeners,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: PerUnitBase) -> Self {
        Network {
            base,
            ..Default::default()
        }
    }

    pub fn add_bus(&mut self, bus: Bus) -> PfResult<()> {
        if self.bus_lookup.contains_key(&bus.id) {
            return Err(PowerFlowError::DuplicateBus(bus.id));
        }
        let n = bus.phases.len();
        for (what, len) in [
            ("nominal voltage", bus.v_nom.len()),
            ("voltage", bus.v.len()),
            ("voltage magnitude setpoint", bus.v_mag_setpoint.len()),
            ("voltage angle setpoint", bus.v_ang_setpoint.len()),
        ] {
            if len != n {
                return Err(PowerFlowError::DimensionMismatch {
                    what: format!("bus `{}` {what}", bus.id),
                    expected: n,
                    rows: len,
                    cols: 1,
                });
            }
        }
        self.bus_lookup.insert(bus.id.clone(), self.buses.len());
        self.buses.push(bus);
        Ok(())
    }

    pub fn add_branch(&mut self, branch: Branch) -> PfResult<()> {
        let bus0 = self.bus_checked(&branch.bus0)?;
        let bus1 = self.bus_checked(&branch.bus1)?;
        for (bus, phases) in [(bus0, &branch.phases0), (bus1, &branch.phases1)] {
            if let Some(p) = phases.iter().find(|p| bus.phases.index_of(**p).is_none()) {
                return Err(PowerFlowError::PhaseMismatch {
                    component: format!("branch `{}`", branch.id),
                    bus: bus.id.clone(),
                    phase: p.to_string(),
                });
            }
        }
        if let Some((n0, n1)) = branch.kind.required_phases() {
            if (n0, n1) != (branch.phases0.len(), branch.phases1.len()) {
                return Err(PowerFlowError::DimensionMismatch {
                    what: format!("branch `{}` terminal phases", branch.id),
                    expected: n0 + n1,
                    rows: branch.phases0.len(),
                    cols: branch.phases1.len(),
                });
            }
        }
        if let BranchKind::Generic { y } = &branch.kind {
            let n = branch.dim();
            if y.shape() != (n, n) {
                return Err(PowerFlowError::DimensionMismatch {
                    what: format!("branch `{}` admittance", branch.id),
                    expected: n,
                    rows: y.nrows(),
                    cols: y.ncols(),
                });
            }
        }
        self.branches.push(branch);
        Ok(())
    }

    pub fn add_gen(&mut self, generator: Generator) -> PfResult<()> {
        let idx = self.bus_index_checked(&generator.bus)?;
        let bus = &self.buses[idx];
        if generator.n_phases() != bus.phases.len() {
            return Err(PowerFlowError::DimensionMismatch {
                what: format!("generator `{}` injection", generator.id),
                expected: bus.phases.len(),
                rows: generator.n_phases(),
                cols: 1,
            });
        }
        self.buses[idx].gens.push(self.gens.len());
        self.gens.push(generator);
        Ok(())
    }

    pub fn add_zip(&mut self, zip: Zip) -> PfResult<()> {
        let idx = self.bus_index_checked(&zip.bus)?;
        let n = self.buses[idx].phases.len();
        for (what, m) in [
            ("constant impedance", &zip.y_const),
            ("constant current", &zip.i_const),
            ("constant power", &zip.s_const),
        ] {
            if m.shape() != (n, n) {
                return Err(PowerFlowError::DimensionMismatch {
                    what: format!("load `{}` {what}", zip.id),
                    expected: n,
                    rows: m.nrows(),
                    cols: m.ncols(),
                });
            }
        }
        self.buses[idx].zips.push(self.zips.len());
        self.zips.push(zip);
        Ok(())
    }

    pub fn bus_index(&self, id: &str) -> Option<usize> {
        self.bus_lookup.get(id).copied()
    }

    fn bus_index_checked(&self, id: &str) -> PfResult<usize> {
        self.bus_index(id)
            .ok_or_else(|| PowerFlowError::UnknownBus(id.to_string()))
    }

    fn bus_checked(&self, id: &str) -> PfResult<&Bus> {
        self.bus_index_checked(id).map(|i| &self.buses[i])
    }

    pub fn bus(&self, id: &str) -> Option<&Bus> {
        self.bus_index(id).map(|i| &self.buses[i])
    }

    pub(crate) fn bus_mut(&mut self, id: &str) -> PfResult<&mut Bus> {
        let idx = self.bus_index_checked(id)?;
        Ok(&mut self.buses[idx])
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub(crate) fn buses_mut(&mut self) -> &mut [Bus] {
        &mut self.buses
    }

    pub(crate) fn gens_mut(&mut self) -> &mut [Generator] {
        &mut self.gens
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn gens(&self) -> &[Generator] {
        &self.gens
    }

    pub fn zips(&self) -> &[Zip] {
        &self.zips
    }

    /// Islands found by the last island analysis.
    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn gens_of<'a>(&'a self, bus: &'a Bus) -> impl Iterator<Item = &'a Generator> + 'a {
        bus.gens.iter().map(move |&i| &self.gens[i])
    }

    pub fn zips_of<'a>(&'a self, bus: &'a Bus) -> impl Iterator<Item = &'a Zip> + 'a {
        bus.zips.iter().map(move |&i| &self.zips[i])
    }

    pub fn n_in_service_gens(&self, bus: &Bus) -> usize {
        self.gens_of(bus).filter(|g| g.in_service).count()
    }

    /// Sum of the in-service generator injections at a bus, per phase.
    pub fn s_gen_requested(&self, bus: &Bus) -> Vec<Complex64> {
        let mut sum = vec![Complex64::new(0.0, 0.0); bus.phases.len()];
        for g in self.gens_of(bus).filter(|g| g.in_service) {
            sum.iter_mut().zip(g.s()).for_each(|(a, b)| *a += b);
        }
        sum
    }

    /// Generation actually delivered: requested less unserved.
    pub fn s_gen(&self, bus: &Bus) -> Vec<Complex64> {
        self.s_gen_requested(bus)
            .into_iter()
            .zip(&bus.s_gen_unserved)
            .map(|(r, u)| r - u)
            .collect()
    }

    /// Sum of the in-service load demand at a bus, evaluated at nominal voltage.
    pub fn s_zip_requested(&self, bus: &Bus) -> Vec<Complex64> {
        let mut sum = vec![Complex64::new(0.0, 0.0); bus.phases.len()];
        for z in self.zips_of(bus).filter(|z| z.in_service) {
            sum.iter_mut()
                .zip(z.s_drawn(&bus.v_nom, &bus.phases))
                .for_each(|(a, b)| *a += b);
        }
        sum
    }

    pub fn set_bus_type(&mut self, id: &str, bus_type: BusType) -> PfResult<()> {
        let bus = self.bus_mut(id)?;
        if bus.bus_type != bus_type {
            bus.bus_type = bus_type;
            self.notify(NetworkEvent::BusTypeChanged {
                bus: id.to_string(),
                bus_type,
            });
        }
        Ok(())
    }

    pub fn set_bus_in_service(&mut self, id: &str, in_service: bool) -> PfResult<()> {
        self.bus_mut(id)?.in_service = in_service;
        self.notify(NetworkEvent::BusServiceChanged {
            bus: id.to_string(),
            in_service,
        });
        Ok(())
    }

    pub fn set_v(&mut self, id: &str, v: Vec<Complex64>) -> PfResult<()> {
        let bus = self.bus_mut(id)?;
        if v.len() != bus.phases.len() {
            return Err(PowerFlowError::DimensionMismatch {
                what: format!("bus `{id}` voltage"),
                expected: bus.phases.len(),
                rows: v.len(),
                cols: 1,
            });
        }
        bus.v = v;
        self.notify(NetworkEvent::VoltageChanged { bus: id.to_string() });
        Ok(())
    }

    /// Sets per-phase magnitude and angle (radians) setpoints.
    pub fn set_v_setpoints(&mut self, id: &str, mag: Vec<f64>, ang: Vec<f64>) -> PfResult<()> {
        let bus = self.bus_mut(id)?;
        let n = bus.phases.len();
        if mag.len() != n || ang.len() != n {
            return Err(PowerFlowError::DimensionMismatch {
                what: format!("bus `{id}` voltage setpoint"),
                expected: n,
                rows: mag.len(),
                cols: ang.len(),
            });
        }
        bus.v_mag_setpoint = mag;
        bus.v_ang_setpoint = ang;
        self.notify(NetworkEvent::SetpointChanged { bus: id.to_string() });
        Ok(())
    }

    /// Moves a bus voltage onto its setpoints (see [`Bus::v_with_setpoints`]).
    pub fn apply_v_setpoints(&mut self, id: &str) -> PfResult<()> {
        let bus = self.bus_mut(id)?;
        bus.v = bus.v_with_setpoints(&bus.v);
        self.notify(NetworkEvent::VoltageChanged { bus: id.to_string() });
        Ok(())
    }

    pub fn set_gen_s(&mut self, gen_idx: usize, s: Vec<Complex64>) -> PfResult<()> {
        let generator = self
            .gens
            .get_mut(gen_idx)
            .ok_or(PowerFlowError::UnknownGenerator(gen_idx))?;
        if s.len() != generator.s.len() {
            return Err(PowerFlowError::DimensionMismatch {
                what: format!("generator `{}` injection", generator.id),
                expected: generator.s.len(),
                rows: s.len(),
                cols: 1,
            });
        }
        generator.s = s;
        let gen_id = generator.id.clone();
        self.notify(NetworkEvent::GenerationChanged { gen_id });
        Ok(())
    }

    pub fn set_gen_in_service(&mut self, gen_idx: usize, in_service: bool) -> PfResult<()> {
        let g = self
            .gens
            .get_mut(gen_idx)
            .ok_or(PowerFlowError::UnknownGenerator(gen_idx))?;
        g.in_service = in_service;
        let gen_id = g.id.clone();
        self.notify(NetworkEvent::GenerationChanged { gen_id });
        Ok(())
    }

    pub fn set_branch_in_service(&mut self, branch_id: &str, in_service: bool) -> PfResult<()> {
        let b = self
            .branches
            .iter_mut()
            .find(|b| b.id == branch_id)
            .ok_or_else(|| PowerFlowError::UnknownBranch(branch_id.to_string()))?;
        b.in_service = in_service;
        self.notify(NetworkEvent::BranchServiceChanged {
            branch: branch_id.to_string(),
            in_service,
        });
        Ok(())
    }

    /// Registers a change listener.
    pub fn subscribe(&mut self, callback: impl Fn(&NetworkEvent) + Send + Sync + 'static) {
        self.listeners.callbacks.push(Box::new(callback));
    }

    pub(crate) fn notify(&self, event: NetworkEvent) {
        if self.listeners.suppressed > 0 {
            return;
        }
        for cb in &self.listeners.callbacks {
            cb(&event);
        }
    }

    pub(crate) fn suppress_events(&mut self) {
        self.listeners.suppressed += 1;
    }

    pub(crate) fn resume_events(&mut self) {
        self.listeners.suppressed = self.listeners.suppressed.saturating_sub(1);
    }

    pub fn to_json(&self) -> PfResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Restores a network, rebuilding lookups and attachments.
    pub fn from_json(json: &str) -> PfResult<Self> {
        let raw: Network = serde_json::from_str(json)?;
        let mut net = Network::with_base(raw.base);
        for mut bus in raw.buses {
            bus.gens.clear();
            bus.zips.clear();
            net.add_bus(bus)?;
        }
        for branch in raw.branches {
            net.add_branch(branch)?;
        }
        for generator in raw.gens {
            net.add_gen(generator)?;
        }
        for zip in raw.zips {
            net.add_zip(zip)?;
        }
        Ok(net)
    }
}
