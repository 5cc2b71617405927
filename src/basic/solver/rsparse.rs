use rsparse::{
    data::{self, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{Pattern, Solve, check_finite};
use crate::basic::error::LinearSolveError;

/// Sparse LU from `rsparse`, with the column ordering cached while the
/// sparsity pattern stays the same.
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<(Pattern, Symb)>,
}

#[allow(non_snake_case)]
impl Solve for RSparseSolver {
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), LinearSolveError> {
        let p: Vec<isize> = Ap.iter().map(|&v| v as isize).collect();
        let a = data::Sprs {
            m: n,
            n,
            i: Ai.to_vec(),
            p,
            x: Ax.to_vec(),
            nzmax: Ax.len(),
        };
        if !self.symbolic.as_ref().is_some_and(|(p, _)| p.matches(n, Ap, Ai)) {
            self.x = vec![0.0; n];
            self.symbolic = Some((Pattern::new(n, Ap, Ai), sqr(&a, 1, false)));
        }
        let Some((_, s)) = self.symbolic.as_mut() else {
            return Err(LinearSolveError::Symbolic("no symbolic analysis".to_string()));
        };
        let num = lu(&a, s, 1e-6)
            .map_err(|_| LinearSolveError::Factorization("LU factorization failed".to_string()))?;
        let mut x = &mut self.x;
        ipvec(&num.pinv, b, &mut x[..]); // x = P*b
        lsolve(&num.l, &mut x); // x = L\x
        usolve(&num.u, &mut x); // x = U\x
        ipvec(&s.q, &x[..], b); // b = Q*x
        check_finite(b)
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => {
            for k in 0..b.len() {
                x[pvec[k] as usize] = b[k];
            }
        }
        None => x.copy_from_slice(b),
    }
}
