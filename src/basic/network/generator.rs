use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::units::Limit;

/// A generator attached to a single bus.
///
/// `s` holds the requested per-phase injection, indexed like the bus phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub id: String,
    pub bus: String,
    pub in_service: bool,
    pub(crate) s: Vec<Complex64>,
    /// Bounds on total real power across phases.
    pub p_limit: Limit<f64>,
    /// Bounds on total reactive power across phases.
    pub q_limit: Limit<f64>,
    /// Rotational inertia.
    pub inertia: f64,
}

impl Generator {
    pub fn new(id: impl Into<String>, bus: impl Into<String>, s: Vec<Complex64>) -> Self {
        Generator {
            id: id.into(),
            bus: bus.into(),
            in_service: true,
            s,
            p_limit: Limit::unbounded(),
            q_limit: Limit::unbounded(),
            inertia: 0.0,
        }
    }

    pub fn with_q_limit(mut self, min: f64, max: f64) -> Self {
        self.q_limit = Limit { min, max };
        self
    }

    pub fn with_p_limit(mut self, min: f64, max: f64) -> Self {
        self.p_limit = Limit { min, max };
        self
    }

    pub fn with_inertia(mut self, inertia: f64) -> Self {
        self.inertia = inertia;
        self
    }

    /// Per-phase injection; zero when out of service.
    pub fn s(&self) -> Vec<Complex64> {
        if self.in_service {
            self.s.clone()
        } else {
            vec![Complex64::new(0.0, 0.0); self.s.len()]
        }
    }

    /// Requested injection regardless of service state.
    pub fn s_requested(&self) -> &[Complex64] {
        &self.s
    }

    pub fn n_phases(&self) -> usize {
        self.s.len()
    }
}
