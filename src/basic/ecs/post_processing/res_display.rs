use std::fmt;

use tabled::Tabled;

/// A wrapper around a float that limits the number of decimal places when printed.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl Default for FloatWrapper {
    fn default() -> Self {
        Self {
            value: Default::default(),
            precision: 3,
        }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

/// One row per bus phase.
#[derive(Debug, Tabled)]
pub(crate) struct BusResTable {
    pub(crate) bus: String,
    pub(crate) phase: String,
    pub(crate) vm_pu: FloatWrapper,
    pub(crate) va_degree: FloatWrapper,
    pub(crate) vm_kv: FloatWrapper,
    pub(crate) p_gen_mw: FloatWrapper,
    pub(crate) q_gen_mvar: FloatWrapper,
    pub(crate) p_load_mw: FloatWrapper,
    pub(crate) q_load_mvar: FloatWrapper,
}

/// One row per branch, summed over phases.
#[derive(Debug, Default, Tabled)]
pub(crate) struct LineResTable {
    pub(crate) branch: String,
    pub(crate) from: String,
    pub(crate) to: String,
    pub(crate) p_from_mw: FloatWrapper,
    pub(crate) q_from_mvar: FloatWrapper,
    pub(crate) p_to_mw: FloatWrapper,
    pub(crate) q_to_mvar: FloatWrapper,
    pub(crate) pl_mw: FloatWrapper,
    pub(crate) ql_mvar: FloatWrapper,
}
