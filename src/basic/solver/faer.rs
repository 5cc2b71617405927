use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};

use super::{Pattern, Solve as PfSolve, check_finite};
use crate::basic::error::LinearSolveError;

/// Sparse LU from `faer`, with the symbolic factorization cached while the
/// sparsity pattern stays the same.
#[derive(Default)]
pub struct FaerSolver {
    symbolic: Option<(Pattern, SymbolicLu<usize>)>,
}

#[allow(non_snake_case)]
impl PfSolve for FaerSolver {
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), LinearSolveError> {
        // CSC input comes from nalgebra-sparse, which keeps row indices sorted and in bounds.
        let s = unsafe { SymbolicSparseColMatRef::new_unchecked(n, n, Ap, None, Ai) };
        let mat = SparseColMatRef::new(s, Ax);
        let symbolic = match &self.symbolic {
            Some((pattern, sym)) if pattern.matches(n, Ap, Ai) => sym.clone(),
            _ => {
                let sym = SymbolicLu::try_new(s).map_err(|_| {
                    LinearSolveError::Symbolic("faer symbolic LU failed".to_string())
                })?;
                self.symbolic = Some((Pattern::new(n, Ap, Ai), sym.clone()));
                sym
            }
        };
        let lu = Lu::try_new_with_symbolic(symbolic, mat)
            .map_err(|_| LinearSolveError::Factorization("faer numeric LU failed".to_string()))?;
        lu.solve_in_place(MatMut::from_column_major_slice_mut(b, n, 1));
        check_finite(b)
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}
