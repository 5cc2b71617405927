use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::bus::Phases;

/// Electrical model of a branch.
///
/// Transformer turns ratios `a` are complex: the voltage ratio from winding 0
/// to winding 1, including any phase shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchKind {
    /// Pi-model line with an optional off-nominal tap on terminal 0.
    Common {
        y_series: Complex64,
        y_shunt: Complex64,
        tap: Complex64,
    },
    /// Explicit admittance block.
    Generic { y: DMatrix<Complex64> },
    SinglePhaseTransformer {
        a: Complex64,
        z_leakage: Complex64,
    },
    /// Delta primary across two phases, single grounded-wye secondary.
    SinglePhaseDgy {
        a: Complex64,
        z_leakage: Complex64,
    },
    YyTransformer {
        a: Complex64,
        z_leakage: Complex64,
        y_magnetising: Complex64,
    },
    DdTransformer {
        a: Complex64,
        z_leakage: Complex64,
    },
}

impl BranchKind {
    /// Balanced line from series impedance and total shunt susceptance.
    pub fn line(z_series: Complex64, b_shunt: f64) -> Self {
        BranchKind::Common {
            y_series: 1.0 / z_series,
            y_shunt: Complex64::new(0.0, b_shunt),
            tap: Complex64::new(1.0, 0.0),
        }
    }

    /// Terminal phase counts this kind requires, if fixed.
    pub fn required_phases(&self) -> Option<(usize, usize)> {
        match self {
            BranchKind::Common { .. } | BranchKind::SinglePhaseTransformer { .. } => Some((1, 1)),
            BranchKind::SinglePhaseDgy { .. } => Some((2, 1)),
            BranchKind::YyTransformer { .. } | BranchKind::DdTransformer { .. } => Some((3, 3)),
            BranchKind::Generic { .. } => None,
        }
    }
}

/// An edge between two buses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub bus0: String,
    pub bus1: String,
    pub phases0: Phases,
    pub phases1: Phases,
    pub in_service: bool,
    pub kind: BranchKind,
}

impl Branch {
    pub fn new(
        id: impl Into<String>,
        bus0: impl Into<String>,
        bus1: impl Into<String>,
        phases0: Phases,
        phases1: Phases,
        kind: BranchKind,
    ) -> Self {
        Branch {
            id: id.into(),
            bus0: bus0.into(),
            bus1: bus1.into(),
            phases0,
            phases1,
            in_service: true,
            kind,
        }
    }

    /// Balanced single-phase branch.
    pub fn balanced(
        id: impl Into<String>,
        bus0: impl Into<String>,
        bus1: impl Into<String>,
        kind: BranchKind,
    ) -> Self {
        Self::new(id, bus0, bus1, Phases::balanced(), Phases::balanced(), kind)
    }

    pub fn dim(&self) -> usize {
        self.phases0.len() + self.phases1.len()
    }

    /// Admittance block, zero when out of service.
    pub fn y(&self) -> DMatrix<Complex64> {
        if self.in_service {
            admittance(&self.kind)
        } else {
            DMatrix::zeros(self.dim(), self.dim())
        }
    }
}

/// Terminal admittance block for a branch kind.
///
/// Rows and columns are ordered terminal 0 phases, then terminal 1 phases.
pub fn admittance(kind: &BranchKind) -> DMatrix<Complex64> {
    let one = Complex64::new(1.0, 0.0);
    match kind {
        BranchKind::Common {
            y_series,
            y_shunt,
            tap,
        } => {
            let y_half = y_series + y_shunt * 0.5;
            DMatrix::from_row_slice(
                2,
                2,
                &[
                    y_half / tap.norm_sqr(),
                    -y_series / tap.conj(),
                    -y_series / tap,
                    y_half,
                ],
            )
        }
        BranchKind::Generic { y } => y.clone(),
        BranchKind::SinglePhaseTransformer { a, z_leakage } => {
            let yl = 1.0 / *z_leakage;
            DMatrix::from_row_slice(
                2,
                2,
                &[yl / a.norm_sqr(), -yl / a.conj(), -yl / a, yl],
            )
        }
        BranchKind::SinglePhaseDgy { a, z_leakage } => {
            let yl = 1.0 / *z_leakage;
            let ai = one / *a;
            let aci = ai.conj();
            let a2i = ai * aci;
            DMatrix::from_row_slice(
                3,
                3,
                &[a2i, -a2i, -aci, -a2i, a2i, aci, -ai, ai, one],
            ) * yl
        }
        BranchKind::YyTransformer {
            a,
            z_leakage,
            y_magnetising,
        } => {
            let yl = 1.0 / *z_leakage;
            let mut y = DMatrix::zeros(6, 6);
            for p in 0..3 {
                y[(p, p)] = yl / a.norm_sqr() + y_magnetising;
                y[(p, p + 3)] = -yl / a.conj();
                y[(p + 3, p)] = -yl / a;
                y[(p + 3, p + 3)] = yl;
            }
            y
        }
        BranchKind::DdTransformer { a, z_leakage } => {
            let yl = 1.0 / *z_leakage;
            let ai = one / *a;
            let aci = ai.conj();
            let a2i = ai * aci;
            let two = 2.0;
            DMatrix::from_row_slice(
                6,
                6,
                &[
                    a2i * two, -a2i, -a2i, -aci * two, aci, aci,
                    -a2i, a2i * two, -a2i, aci, -aci * two, aci,
                    -a2i, -a2i, a2i * two, aci, aci, -aci * two,
                    -ai * two, ai, ai, one * two, -one, -one,
                    ai, -ai * two, ai, -one, one * two, -one,
                    ai, ai, -ai * two, -one, -one, one * two,
                ],
            ) * yl
        }
    }
}
