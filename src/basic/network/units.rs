use std::marker::PhantomData;

use derive_more::derive::{Deref, DerefMut, From, Into};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Macro for defining a new unit marker type.
///
/// ```ignore
/// define_unit!(MW, "mw");
/// ```
macro_rules! define_unit {
    ($unit:ident, $suffix:literal) => {
        #[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
        pub struct $unit;

        impl UnitTrait for $unit {
            const SUFFIX: &'static str = $suffix;
        }
    };
}

/// A value paired with a unit marker.
///
/// Keeps base quantities such as the network power base or a bus voltage base
/// from being mixed up with per-unit values.
#[derive(
    Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, From, Into, Deref, DerefMut,
)]
#[serde(transparent)]
pub struct Pair<T, Unit>(
    /// The underlying numeric value.
    pub T,
    /// Phantom marker for the unit type.
    #[deref(ignore)]
    #[deref_mut(ignore)]
    #[serde(skip)]
    pub PhantomData<Unit>,
);

impl<T, Unit> Pair<T, Unit> {
    pub fn new(value: T) -> Self {
        Pair(value, PhantomData)
    }
}

/// Unit marker types, providing a string suffix for display.
pub trait UnitTrait {
    /// The unit suffix used in display, e.g. "kv", "mw", "pu".
    const SUFFIX: &'static str;

    fn suffix() -> &'static str {
        Self::SUFFIX
    }
}

define_unit!(PerUnit, "pu");
define_unit!(KV, "kv");
define_unit!(MW, "mw");
define_unit!(MVar, "mvar");
define_unit!(MVA, "mva");

impl<T, Unit: UnitTrait> UnitTrait for Pair<T, Unit> {
    const SUFFIX: &'static str = Unit::SUFFIX;
}

/// Min/max bounds on a value.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Limit<T> {
    pub min: T,
    pub max: T,
}

impl Limit<f64> {
    /// Bounds that never bind.
    pub fn unbounded() -> Self {
        Limit {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// Clamps `value`, returning the bound that was hit if any.
    pub fn clamp(&self, value: f64) -> Option<f64> {
        if value < self.min {
            Some(self.min)
        } else if value > self.max {
            Some(self.max)
        } else {
            None
        }
    }

    /// True when both bounds are zero, i.e. no regulating range at all.
    pub fn is_zero_range(&self) -> bool {
        self.min == 0.0 && self.max == 0.0
    }
}

impl Default for Limit<f64> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl std::ops::Add for Limit<f64> {
    type Output = Limit<f64>;

    fn add(self, rhs: Self) -> Self::Output {
        Limit {
            min: self.min + rhs.min,
            max: self.max + rhs.max,
        }
    }
}

/// Base quantities for converting per-unit results into physical units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PerUnitBase {
    /// Three-phase power base.
    pub s_base: Pair<f64, MVA>,
}

impl Default for PerUnitBase {
    fn default() -> Self {
        PerUnitBase {
            s_base: Pair::new(100.0),
        }
    }
}

impl PerUnitBase {
    /// Complex power in MW / MVAr.
    pub fn power_to_physical(&self, s_pu: Complex64) -> (Pair<f64, MW>, Pair<f64, MVar>) {
        let s = s_pu * *self.s_base;
        (Pair::new(s.re), Pair::new(s.im))
    }

    pub fn power_to_pu(&self, p_mw: f64, q_mvar: f64) -> Complex64 {
        Complex64::new(p_mw, q_mvar) / *self.s_base
    }

    /// Voltage in kV for a bus with voltage base `v_base`.
    pub fn voltage_to_physical(&self, v_pu: Complex64, v_base: Pair<f64, KV>) -> Complex64 {
        v_pu * *v_base
    }

    /// Impedance base in ohms for a voltage base.
    pub fn z_base(&self, v_base: Pair<f64, KV>) -> f64 {
        *v_base * *v_base / *self.s_base
    }
}
