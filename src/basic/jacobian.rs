//! Current-balance mismatch and its analytic Jacobian in rectangular coordinates.
//!
//! Unknowns are laid out two per non-slack node: `(Vr, Vi)` for PQ nodes and
//! `(Q, Vi)` for PV nodes. Mismatch rows are laid out two per node as
//! `(Im D, Re D)`, which puts the susceptance-dominated entries on the diagonal.
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;

use super::model::PowerFlowModel;

const J: Complex64 = Complex64::new(0.0, 1.0);

/// A current and its partial derivatives with respect to the real and
/// imaginary parts of the voltage it depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CurrentSens {
    pub i: Complex64,
    pub d_re: Complex64,
    pub d_im: Complex64,
}

impl CurrentSens {
    const ZERO: CurrentSens = CurrentSens {
        i: Complex64::new(0.0, 0.0),
        d_re: Complex64::new(0.0, 0.0),
        d_im: Complex64::new(0.0, 0.0),
    };
}

/// Current `c / conj(u)`, i.e. `conj(S / u)` with `c = conj(S)`.
pub(crate) fn power_current(c: Complex64, u: Complex64) -> CurrentSens {
    if u.norm_sqr() == 0.0 {
        return CurrentSens::ZERO;
    }
    let uc = u.conj();
    let d = -c / (uc * uc);
    CurrentSens {
        i: c / uc,
        d_re: d,
        d_im: -d * J,
    }
}

/// Current `c * u / |u|`: fixed magnitude, phase locked to `u`.
pub(crate) fn rotating_current(c: Complex64, u: Complex64) -> CurrentSens {
    let m = u.norm();
    if m == 0.0 {
        return CurrentSens::ZERO;
    }
    let m3 = m * m * m;
    CurrentSens {
        i: c * u / m,
        d_re: c * (1.0 / m - u * u.re / m3),
        d_im: c * (J / m - u * u.im / m3),
    }
}

#[derive(Debug, Clone, Copy)]
enum LoadKind {
    Current(Complex64),
    Power(Complex64),
}

/// A constant-current or constant-power load element between node `a` and
/// node `b`, or ground when `b` is `None`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadElement {
    a: usize,
    b: Option<usize>,
    kind: LoadKind,
}

impl LoadElement {
    fn voltage(&self, v: &DVector<Complex64>) -> Complex64 {
        match self.b {
            Some(b) => v[self.a] - v[b],
            None => v[self.a],
        }
    }

    /// Current drawn from `a` towards `b`.
    fn drawn(&self, v: &DVector<Complex64>) -> CurrentSens {
        let u = self.voltage(v);
        match self.kind {
            LoadKind::Current(ic) => rotating_current(ic, u),
            LoadKind::Power(s) => power_current(s.conj(), u),
        }
    }
}

/// Load elements of a validated model.
pub(crate) fn load_elements(model: &PowerFlowModel) -> Vec<LoadElement> {
    let mut out = Vec::with_capacity(model.i_const.nnz() + model.s_const.nnz());
    let mut collect = |m: &CscMatrix<Complex64>, kind: fn(Complex64) -> LoadKind| {
        for (r, c, val) in m.triplet_iter() {
            out.push(LoadElement {
                a: r,
                b: (r != c).then_some(c),
                kind: kind(*val),
            });
        }
    };
    collect(&model.i_const, LoadKind::Current);
    collect(&model.s_const, LoadKind::Power);
    out
}

/// Net current drawn at every node by the load elements.
pub(crate) fn load_currents(
    elements: &[LoadElement],
    v: &DVector<Complex64>,
) -> DVector<Complex64> {
    let mut out = DVector::zeros(v.len());
    for e in elements {
        let i = e.drawn(v).i;
        out[e.a] += i;
        if let Some(b) = e.b {
            out[b] -= i;
        }
    }
    out
}

/// Current-balance mismatch for the first `m` nodes:
/// `conj(S_gen)/conj(V) - I_load - (Y V)`.
pub(crate) fn mismatch(
    y: &CscMatrix<Complex64>,
    elements: &[LoadElement],
    v: &DVector<Complex64>,
    s_gen: &DVector<Complex64>,
    m: usize,
) -> DVector<Complex64> {
    let yv = y * v;
    let i_load = load_currents(elements, v);
    DVector::from_fn(m, |k, _| power_current(s_gen[k].conj(), v[k]).i - i_load[k] - yv[k])
}

/// Stacks a complex mismatch as `(Im, Re)` row pairs.
pub(crate) fn stack(d: &DVector<Complex64>) -> DVector<f64> {
    DVector::from_fn(2 * d.len(), |r, _| {
        let dk = d[r / 2];
        if r % 2 == 0 { dk.im } else { dk.re }
    })
}

/// Per-iteration Jacobian assembly with the PV substitution folded in.
///
/// For a PV node `k` the real-part correction is eliminated with
/// `dVr = (M2 - Vr^2 - Vi^2)/(2 Vr) - (Vi/Vr) dVi`, so every entry destined
/// for the `Vr` column is redistributed into the `Vi` column and a constant
/// shift of the right-hand side.
pub(crate) struct JacobianBuilder {
    coo: CooMatrix<f64>,
    n_pq: usize,
    m: usize,
    f_mult: Vec<f64>,
    vi_mult: Vec<f64>,
    /// Accumulated right-hand side shift from the substitution.
    pub f_shift: DVector<f64>,
}

impl JacobianBuilder {
    pub fn new(n_pq: usize, m: usize, v: &DVector<Complex64>, m2_setpoint: &DVector<f64>) -> Self {
        let mut f_mult = vec![0.0; m];
        let mut vi_mult = vec![0.0; m];
        for k in n_pq..m {
            let (vr, vi) = (v[k].re, v[k].im);
            f_mult[k] = 0.5 * (m2_setpoint[k] - vr * vr - vi * vi) / vr;
            vi_mult[k] = -vi / vr;
        }
        JacobianBuilder {
            coo: CooMatrix::new(2 * m, 2 * m),
            n_pq,
            m,
            f_mult,
            vi_mult,
            f_shift: DVector::zeros(2 * m),
        }
    }

    fn push_real(&mut self, row: usize, col: usize, val: f64) {
        let k = col / 2;
        if k >= self.n_pq && col % 2 == 0 {
            self.f_shift[row] += val * self.f_mult[k];
            self.coo.push(row, col + 1, val * self.vi_mult[k]);
        } else {
            self.coo.push(row, col, val);
        }
    }

    /// Adds `dD_r/dVr_c = d_re` and `dD_r/dVi_c = d_im`.
    pub fn add(&mut self, r: usize, c: usize, d_re: Complex64, d_im: Complex64) {
        if r >= self.m || c >= self.m {
            return;
        }
        self.push_real(2 * r, 2 * c, d_re.im);
        self.push_real(2 * r + 1, 2 * c, d_re.re);
        self.push_real(2 * r, 2 * c + 1, d_im.im);
        self.push_real(2 * r + 1, 2 * c + 1, d_im.re);
    }

    /// Adds `dD_k/dQ_k` into the `Q` column of PV node `k`.
    pub fn add_q(&mut self, k: usize, d_q: Complex64) {
        self.coo.push(2 * k, 2 * k, d_q.im);
        self.coo.push(2 * k + 1, 2 * k, d_q.re);
    }

    pub fn build(self) -> (CscMatrix<f64>, DVector<f64>) {
        (CscMatrix::from(&self.coo), self.f_shift)
    }
}

/// Assembles the Jacobian of the mismatch at `v` and the substitution shift.
pub(crate) fn jacobian(
    y: &CscMatrix<Complex64>,
    elements: &[LoadElement],
    v: &DVector<Complex64>,
    s_gen: &DVector<Complex64>,
    m2_setpoint: &DVector<f64>,
    n_pq: usize,
    m: usize,
) -> (CscMatrix<f64>, DVector<f64>) {
    let mut jb = JacobianBuilder::new(n_pq, m, v, m2_setpoint);

    // -Y V
    for (r, c, yrc) in y.triplet_iter() {
        jb.add(r, c, -*yrc, -*yrc * J);
    }

    // Generation injection conj(S)/conj(V).
    for k in 0..m {
        let g = power_current(s_gen[k].conj(), v[k]);
        jb.add(k, k, g.d_re, g.d_im);
        if k >= n_pq {
            // d/dQ of (P - jQ)/conj(V)
            jb.add_q(k, -J / v[k].conj());
        }
    }

    // Loads inject -I at a and +I at b.
    for e in elements {
        let s = e.drawn(v);
        jb.add(e.a, e.a, -s.d_re, -s.d_im);
        if let Some(b) = e.b {
            jb.add(e.a, b, s.d_re, s.d_im);
            jb.add(b, e.a, s.d_re, s.d_im);
            jb.add(b, b, -s.d_re, -s.d_im);
        }
    }

    jb.build()
}

#[cfg(test)]
mod tests {
    use nalgebra::DMatrix;

    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    /// Central differences of `f` at `u` in the real and imaginary directions.
    fn numeric(f: impl Fn(Complex64) -> Complex64, u: Complex64) -> (Complex64, Complex64) {
        let h = 1e-7;
        let d_re = (f(u + c(h, 0.0)) - f(u - c(h, 0.0))) / (2.0 * h);
        let d_im = (f(u + c(0.0, h)) - f(u - c(0.0, h))) / (2.0 * h);
        (d_re, d_im)
    }

    #[test]
    fn test_power_current_derivatives() {
        let s = c(0.7, -0.3);
        let u = c(0.95, -0.12);
        let an = power_current(s, u);
        let (d_re, d_im) = numeric(|u| power_current(s, u).i, u);
        assert!((an.d_re - d_re).norm() < 1e-6);
        assert!((an.d_im - d_im).norm() < 1e-6);
    }

    #[test]
    fn test_rotating_current_derivatives() {
        let ic = c(0.4, 0.2);
        let u = c(-0.5, 0.8);
        let an = rotating_current(ic, u);
        assert!((an.i.norm() - ic.norm()).abs() < 1e-12);
        let (d_re, d_im) = numeric(|u| rotating_current(ic, u).i, u);
        assert!((an.d_re - d_re).norm() < 1e-6);
        assert!((an.d_im - d_im).norm() < 1e-6);
    }

    /// Full Jacobian of a 3-node PQ system with phase-to-phase loads against
    /// finite differences of the stacked mismatch.
    #[test]
    fn test_jacobian_matches_finite_difference() {
        let n = 3;
        let mut yd = DMatrix::from_element(n, n, c(-2.0, 8.0));
        for i in 0..n {
            yd[(i, i)] = c(4.5, -15.0);
        }
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            for k in 0..n {
                coo.push(i, k, yd[(i, k)]);
            }
        }
        let y = CscMatrix::from(&coo);
        let elements = vec![
            LoadElement { a: 0, b: None, kind: LoadKind::Power(c(0.3, 0.1)) },
            LoadElement { a: 1, b: Some(2), kind: LoadKind::Current(c(0.2, -0.05)) },
            LoadElement { a: 0, b: Some(2), kind: LoadKind::Power(c(0.1, 0.02)) },
        ];
        let v = DVector::from_vec(vec![
            Complex64::from_polar(0.98, -0.05),
            Complex64::from_polar(0.97, -2.15),
            Complex64::from_polar(0.99, 2.05),
        ]);
        let s_gen = DVector::from_vec(vec![c(0.1, 0.05), c(0.0, 0.0), c(0.2, -0.1)]);
        let m2 = DVector::zeros(n);

        let (jac, shift) = jacobian(&y, &elements, &v, &s_gen, &m2, n, n);
        assert!(shift.iter().all(|s| *s == 0.0));
        let mut jd = DMatrix::<f64>::zeros(2 * n, 2 * n);
        for (r, k, val) in jac.triplet_iter() {
            jd[(r, k)] += *val;
        }

        let h = 1e-7;
        for k in 0..n {
            for (col, dir) in [(2 * k, c(h, 0.0)), (2 * k + 1, c(0.0, h))] {
                let mut vp = v.clone();
                vp[k] += dir;
                let mut vm = v.clone();
                vm[k] -= dir;
                let fp = stack(&mismatch(&y, &elements, &vp, &s_gen, n));
                let fm = stack(&mismatch(&y, &elements, &vm, &s_gen, n));
                for r in 0..2 * n {
                    let num = (fp[r] - fm[r]) / (2.0 * h);
                    assert!(
                        (jd[(r, col)] - num).abs() < 1e-5,
                        "J[{}, {}] = {} vs {}",
                        r,
                        col,
                        jd[(r, col)],
                        num
                    );
                }
            }
        }
    }

    #[test]
    fn test_pv_substitution_folds_vr_column() {
        // Node 0 fed from node 1 through an admittance.
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, c(1.0, -10.0));
        coo.push(1, 1, c(1.0, -10.0));
        coo.push(0, 1, c(-1.0, 10.0));
        coo.push(1, 0, c(-1.0, 10.0));
        let y = CscMatrix::from(&coo);
        let v = DVector::from_vec(vec![c(1.0, 0.1), c(1.0, 0.0)]);
        let s_gen = DVector::from_vec(vec![c(0.5, 0.0), c(0.0, 0.0)]);
        let m2 = DVector::from_vec(vec![1.0, 1.0]);

        let to_dense = |m: &CscMatrix<f64>| {
            let mut d = DMatrix::<f64>::zeros(m.nrows(), m.ncols());
            for (r, k, val) in m.triplet_iter() {
                d[(r, k)] += *val;
            }
            d
        };
        // Unfolded: node 0 treated as PQ.
        let (full, _) = jacobian(&y, &[], &v, &s_gen, &m2, 1, 1);
        let full = to_dense(&full);
        let (folded, shift) = jacobian(&y, &[], &v, &s_gen, &m2, 0, 1);
        let folded = to_dense(&folded);

        let f_mult = 0.5 * (1.0 - 1.01) / 1.0;
        let vi_mult = -0.1;
        let dq = -J / v[0].conj();
        for r in 0..2 {
            assert!((shift[r] - full[(r, 0)] * f_mult).abs() < 1e-12);
            let expected = full[(r, 1)] + full[(r, 0)] * vi_mult;
            assert!((folded[(r, 1)] - expected).abs() < 1e-12);
        }
        assert!((folded[(0, 0)] - dq.im).abs() < 1e-12);
        assert!((folded[(1, 0)] - dq.re).abs() < 1e-12);
    }
}
