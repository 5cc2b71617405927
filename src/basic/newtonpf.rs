use nalgebra::DVector;
use num_complex::Complex64;
use thiserror::Error;
use tracing::{debug_span, trace};

use super::error::LinearSolveError;
use super::jacobian::{jacobian, load_currents, load_elements, mismatch, stack};
use super::model::PowerFlowModel;
use super::solver::Solve;

/// Statistics of a converged Newton-Raphson run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NrStats {
    pub iterations: usize,
    /// Final infinity norm of the current mismatch.
    pub mismatch: f64,
}

/// Why a Newton-Raphson run gave up.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NrFailure {
    #[error("no convergence after {iterations} iterations (mismatch {mismatch:e})")]
    MaxIter { iterations: usize, mismatch: f64 },
    #[error("mismatch became non-finite at iteration {iterations}")]
    NonFinite { iterations: usize },
    #[error(transparent)]
    LinearSolve(#[from] LinearSolveError),
}

/// Largest real or imaginary component, or `None` if any is not finite.
fn inf_norm(d: &DVector<Complex64>) -> Option<f64> {
    d.iter().try_fold(0.0_f64, |acc, x| {
        (x.re.is_finite() && x.im.is_finite()).then(|| acc.max(x.re.abs()).max(x.im.abs()))
    })
}

#[allow(non_snake_case)]
/// Newton-Raphson on the nodal current balance in rectangular coordinates.
///
/// The model must be validated. Unknowns are the real and imaginary voltage of
/// PQ nodes, and the imaginary voltage plus reactive generation of PV nodes,
/// whose real voltage follows from the magnitude setpoint. Slack voltages are
/// held.
///
/// On convergence the model's node voltages and generation are overwritten,
/// slack generation being back-computed from the balance. On failure the
/// model is left as it was.
pub fn newton_pf_rect<S: Solve>(
    model: &mut PowerFlowModel,
    tol: f64,
    max_iter: usize,
    solver: &mut S,
) -> Result<NrStats, NrFailure> {
    let n_pq = model.n_pq;
    let m = model.n_var();
    let elements = load_elements(model);
    let m2 = model.m2_setpoint();
    let mut v = model.v();
    let mut s_gen = model.s_gen();

    let mut iterations = 0;
    let err = loop {
        let d = mismatch(&model.y, &elements, &v, &s_gen, m);
        let err = inf_norm(&d).ok_or(NrFailure::NonFinite { iterations })?;
        trace!(iterations, mismatch = err);
        if err <= tol {
            break err;
        }
        if iterations >= max_iter {
            return Err(NrFailure::MaxIter { iterations, mismatch: err });
        }
        iterations += 1;
        let _span = debug_span!("newton_iter", iter = iterations).entered();

        let (J, shift) = jacobian(&model.y, &elements, &v, &s_gen, &m2, n_pq, m);
        let mut dx = -(stack(&d) + shift);
        let (mut Ap, mut Ai, mut Ax) = J.disassemble();
        solver.solve(&mut Ap, &mut Ai, &mut Ax, dx.as_mut_slice(), 2 * m)?;

        for k in 0..n_pq {
            v[k] += Complex64::new(dx[2 * k], dx[2 * k + 1]);
        }
        for k in n_pq..m {
            let (vr, vi) = (v[k].re, v[k].im);
            let dvi = dx[2 * k + 1];
            let vr = vr + 0.5 * (m2[k] - vr * vr - vi * vi - 2.0 * vi * dvi) / vr;
            v[k] = Complex64::new(vr, vi + dvi);
            s_gen[k].im += dx[2 * k];
        }
    };

    // Slack generation closes the balance.
    let yv = &model.y * &v;
    let i_load = load_currents(&elements, &v);
    for k in m..v.len() {
        s_gen[k] = v[k] * (yv[k] + i_load[k]).conj();
    }

    model.set_v(&v);
    model.set_s_gen(&s_gen);
    Ok(NrStats { iterations, mismatch: err })
}

#[cfg(test)]
mod tests {
    use nalgebra::DMatrix;

    use super::*;
    use crate::basic::model::{PfBranch, PfBus};
    use crate::basic::network::{BusType, Phases};
    use crate::basic::solver::DefaultSolver;

    /// Reports every system as singular.
    struct SingularSolver;

    impl Solve for SingularSolver {
        fn solve(
            &mut self,
            _: &mut [usize],
            _: &mut [usize],
            _: &mut [f64],
            _: &mut [f64],
            _: usize,
        ) -> Result<(), LinearSolveError> {
            Err(LinearSolveError::Singular)
        }
    }

    /// Claims success but hands back NaN.
    struct NanSolver;

    impl Solve for NanSolver {
        fn solve(
            &mut self,
            _: &mut [usize],
            _: &mut [usize],
            _: &mut [f64],
            b: &mut [f64],
            _: usize,
        ) -> Result<(), LinearSolveError> {
            b.fill(f64::NAN);
            Ok(())
        }
    }

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn series(id: &str, a: &str, b: &str, y: Complex64) -> PfBranch {
        PfBranch {
            id: id.into(),
            bus0: a.into(),
            bus1: b.into(),
            phases0: Phases::balanced(),
            phases1: Phases::balanced(),
            y: DMatrix::from_row_slice(2, 2, &[y, -y, -y, y]),
        }
    }

    fn bus(id: &str, bus_type: BusType, v: Complex64, s_gen: Complex64) -> PfBus {
        PfBus::new(id, bus_type, Phases::balanced(), &[v], &[s_gen])
    }

    fn three_bus_pv() -> PowerFlowModel {
        let mut model = PowerFlowModel::new();
        model.add_bus(bus("a", BusType::Slack, c(1.0, 0.0), c(0.0, 0.0))).unwrap();
        model.add_bus(bus("b", BusType::PV, c(1.02, 0.0), c(0.5, 0.0))).unwrap();
        let mut load = bus("c", BusType::PQ, c(1.0, 0.0), c(0.0, 0.0));
        load.s_zip[(0, 0)] = c(0.8, 0.3);
        model.add_bus(load).unwrap();
        model.add_branch(series("ab", "a", "b", c(5.0, -25.0)));
        model.add_branch(series("bc", "b", "c", c(4.0, -20.0)));
        model.validate().unwrap();
        model
    }

    /// Slack feeding a constant-power load over a single series admittance.
    fn two_bus(load: Complex64) -> PowerFlowModel {
        let mut model = PowerFlowModel::new();
        model.add_bus(bus("a", BusType::Slack, c(1.0, 0.0), c(0.0, 0.0))).unwrap();
        let mut b = bus("b", BusType::PQ, c(1.0, 0.0), c(0.0, 0.0));
        b.s_zip[(0, 0)] = load;
        model.add_bus(b).unwrap();
        model.add_branch(series("ab", "a", "b", c(10.0, -20.0)));
        model.validate().unwrap();
        model
    }

    #[test]
    fn test_two_bus_matches_closed_form() {
        let load = c(1.0, 0.5);
        let mut model = two_bus(load);
        let stats = newton_pf_rect(&mut model, 1e-10, 20, &mut DefaultSolver::default()).unwrap();
        assert!(stats.iterations > 0 && stats.iterations < 10);

        // |V_b|^2 is the larger root of u^2 + (2 Re(z conj S) - 1) u + |z|^2 |S|^2.
        let z = c(1.0, 0.0) / c(10.0, -20.0);
        let p = 2.0 * (z * load.conj()).re - 1.0;
        let q = z.norm_sqr() * load.norm_sqr();
        let u = 0.5 * (-p + (p * p - 4.0 * q).sqrt());
        let vb = model.bus("b").unwrap().nodes[0].v;
        assert!((vb.norm() - u.sqrt()).abs() < 1e-8);

        let s_slack = model.bus("a").unwrap().nodes[0].s_gen;
        let expected = load + z * (load.norm_sqr() / u);
        assert!((s_slack - expected).norm() < 1e-8);
        assert_eq!(model.bus("a").unwrap().nodes[0].v, c(1.0, 0.0));
    }

    #[test]
    fn test_pv_bus_holds_magnitude() {
        let mut model = three_bus_pv();

        newton_pf_rect(&mut model, 1e-10, 20, &mut DefaultSolver::default()).unwrap();

        let b = model.bus("b").unwrap().nodes[0].clone();
        assert!((b.v.norm() - 1.02).abs() < 1e-8);
        assert!((b.s_gen.re - 0.5).abs() < 1e-12);

        // Injected power at b matches the network flow out of b.
        let v = model.v();
        let yv = &model.y * &v;
        let s_net = v[b.idx] * yv[b.idx].conj();
        assert!((s_net - b.s_gen).norm() < 1e-8);
    }

    #[test]
    fn test_constant_current_load_keeps_magnitude() {
        let mut model = PowerFlowModel::new();
        model.add_bus(bus("a", BusType::Slack, c(1.0, 0.0), c(0.0, 0.0))).unwrap();
        let mut b = bus("b", BusType::PQ, c(1.0, 0.0), c(0.0, 0.0));
        b.i_zip[(0, 0)] = c(0.6, -0.2);
        model.add_bus(b).unwrap();
        model.add_branch(series("ab", "a", "b", c(10.0, -30.0)));
        model.validate().unwrap();

        newton_pf_rect(&mut model, 1e-10, 20, &mut DefaultSolver::default()).unwrap();

        let v = model.v();
        let yv = &model.y * &v;
        let vb = v[0];
        // Current drawn is 0.6 - 0.2j rotated onto V_b and must equal the inflow.
        let drawn = c(0.6, -0.2) * vb / vb.norm();
        assert!((yv[0] + drawn).norm() < 1e-8);
    }

    #[test]
    fn test_slack_only_converges_immediately() {
        let mut model = PowerFlowModel::new();
        let mut a = bus("a", BusType::Slack, c(1.0, 0.0), c(0.0, 0.0));
        a.s_zip[(0, 0)] = c(0.2, 0.1);
        model.add_bus(a).unwrap();
        model.validate().unwrap();

        let stats = newton_pf_rect(&mut model, 1e-8, 10, &mut DefaultSolver::default()).unwrap();
        assert_eq!(stats.iterations, 0);
        assert!((model.bus("a").unwrap().nodes[0].s_gen - c(0.2, 0.1)).norm() < 1e-12);
    }

    #[test]
    fn test_failure_leaves_model_untouched() {
        let mut model = two_bus(c(20.0, 10.0));
        let before = model.v();
        let res = newton_pf_rect(&mut model, 1e-10, 15, &mut DefaultSolver::default());
        assert!(res.is_err());
        assert_eq!(model.v(), before);
        assert_eq!(model.bus("a").unwrap().nodes[0].s_gen, c(0.0, 0.0));
    }

    #[test]
    fn test_zero_iterations_reports_max_iter() {
        let mut model = two_bus(c(1.0, 0.5));
        let res = newton_pf_rect(&mut model, 1e-10, 0, &mut DefaultSolver::default());
        assert!(matches!(res, Err(NrFailure::MaxIter { iterations: 0, .. })));
    }

    #[test]
    fn test_one_solver_across_models_of_different_size() {
        let mut solver = DefaultSolver::default();
        let mut small = two_bus(c(1.0, 0.5));
        let mut large = three_bus_pv();
        newton_pf_rect(&mut small, 1e-10, 20, &mut solver).unwrap();
        newton_pf_rect(&mut large, 1e-10, 20, &mut solver).unwrap();
        assert!((large.bus("b").unwrap().nodes[0].v.norm() - 1.02).abs() < 1e-8);

        let mut again = two_bus(c(1.0, 0.5));
        newton_pf_rect(&mut again, 1e-10, 20, &mut solver).unwrap();
        assert!((again.v() - small.v()).norm() < 1e-12);
    }

    #[test]
    fn test_singular_linear_solve_fails_run() {
        let mut model = two_bus(c(1.0, 0.5));
        let before = model.v();
        let res = newton_pf_rect(&mut model, 1e-10, 20, &mut SingularSolver);
        assert_eq!(res, Err(NrFailure::LinearSolve(LinearSolveError::Singular)));
        assert_eq!(model.v(), before);
    }

    #[test]
    fn test_non_finite_step_fails_run() {
        let mut model = two_bus(c(1.0, 0.5));
        let before = model.v();
        let res = newton_pf_rect(&mut model, 1e-10, 20, &mut NanSolver);
        assert_eq!(res, Err(NrFailure::NonFinite { iterations: 1 }));
        assert_eq!(model.v(), before);
        assert_eq!(model.bus("a").unwrap().nodes[0].s_gen, c(0.0, 0.0));
    }
}
