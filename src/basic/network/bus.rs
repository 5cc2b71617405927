use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::units::{KV, Limit, Pair};

/// A single conductor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Balanced positive-sequence equivalent.
    Bal,
    A,
    B,
    C,
    N,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Bal => "BAL",
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::N => "N",
        };
        write!(f, "{s}")
    }
}

/// Ordered list of phases carried by a bus or a branch terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Phases(pub Vec<Phase>);

impl Phases {
    pub fn balanced() -> Self {
        Phases(vec![Phase::Bal])
    }

    pub fn abc() -> Self {
        Phases(vec![Phase::A, Phase::B, Phase::C])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index_of(&self, phase: Phase) -> Option<usize> {
        self.0.iter().position(|p| *p == phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.0.iter()
    }
}

impl fmt::Display for Phases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Bus classification for power flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BusType {
    Slack,
    PV,
    #[default]
    PQ,
    Invalid,
}

/// An electrical node grouping co-located phase conductors.
///
/// All electrical quantities are per-unit. `v_base` is only used for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    pub id: String,
    pub phases: Phases,
    /// Nominal phase voltages.
    pub v_nom: Vec<Complex64>,
    pub v_base: Pair<f64, KV>,
    pub(crate) bus_type: BusType,
    pub(crate) v_mag_setpoint: Vec<f64>,
    /// Radians.
    pub(crate) v_ang_setpoint: Vec<f64>,
    pub v_mag_limit: Limit<f64>,
    pub in_service: bool,
    pub(crate) v: Vec<Complex64>,
    pub(crate) island: Option<usize>,
    pub(crate) s_gen_unserved: Vec<Complex64>,
    pub(crate) s_zip_unserved: Vec<Complex64>,
    /// Indices into the network generator list, in attachment order.
    #[serde(skip)]
    pub(crate) gens: Vec<usize>,
    /// Indices into the network load list, in attachment order.
    #[serde(skip)]
    pub(crate) zips: Vec<usize>,
}

impl Bus {
    pub fn new(
        id: impl Into<String>,
        bus_type: BusType,
        phases: Phases,
        v_nom: Vec<Complex64>,
    ) -> Self {
        let n = phases.len();
        let v_mag_setpoint = v_nom.iter().map(|v| v.norm()).collect();
        let v_ang_setpoint = v_nom.iter().map(|v| v.arg()).collect();
        Bus {
            id: id.into(),
            phases,
            v: v_nom.clone(),
            v_nom,
            v_base: Pair::new(1.0),
            bus_type,
            v_mag_setpoint,
            v_ang_setpoint,
            v_mag_limit: Limit { min: 0.9, max: 1.1 },
            in_service: true,
            island: None,
            s_gen_unserved: vec![Complex64::new(0.0, 0.0); n],
            s_zip_unserved: vec![Complex64::new(0.0, 0.0); n],
            gens: Vec::new(),
            zips: Vec::new(),
        }
    }

    /// Single-phase balanced bus with a nominal voltage of 1 p.u.
    pub fn balanced(id: impl Into<String>, bus_type: BusType) -> Self {
        Self::new(id, bus_type, Phases::balanced(), vec![Complex64::new(1.0, 0.0)])
    }

    pub fn with_v_base(mut self, kv: f64) -> Self {
        self.v_base = Pair::new(kv);
        self
    }

    pub fn bus_type(&self) -> BusType {
        self.bus_type
    }

    pub fn v(&self) -> &[Complex64] {
        &self.v
    }

    pub fn v_mag_setpoint(&self) -> &[f64] {
        &self.v_mag_setpoint
    }

    pub fn v_ang_setpoint(&self) -> &[f64] {
        &self.v_ang_setpoint
    }

    /// Island index, `None` until island analysis has run.
    pub fn island(&self) -> Option<usize> {
        self.island
    }

    pub fn s_gen_unserved(&self) -> &[Complex64] {
        &self.s_gen_unserved
    }

    pub fn s_zip_unserved(&self) -> &[Complex64] {
        &self.s_zip_unserved
    }

    pub fn gen_indices(&self) -> &[usize] {
        &self.gens
    }

    pub fn zip_indices(&self) -> &[usize] {
        &self.zips
    }

    /// Voltage the bus should start from given its type and setpoints.
    ///
    /// Slack buses take their setpoint phasor; PV buses keep the angle of `v`
    /// and take the setpoint magnitude. A zero `v` falls back to the nominal
    /// angle so a de-energized bus can be re-seeded.
    pub fn v_with_setpoints(&self, v: &[Complex64]) -> Vec<Complex64> {
        match self.bus_type {
            BusType::Slack => self
                .v_mag_setpoint
                .iter()
                .zip(&self.v_ang_setpoint)
                .map(|(m, a)| Complex64::from_polar(*m, *a))
                .collect(),
            BusType::PV => v
                .iter()
                .zip(&self.v_mag_setpoint)
                .zip(&self.v_nom)
                .map(|((vi, m), vn)| {
                    let mag = vi.norm();
                    if mag > 0.0 {
                        vi * (*m / mag)
                    } else {
                        Complex64::from_polar(*m, vn.arg())
                    }
                })
                .collect(),
            _ => v.to_vec(),
        }
    }
}
