//! Sparse linear solver backends for the Newton step.
use super::error::LinearSolveError;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

#[allow(non_snake_case)]
/// A trait for solving sparse linear systems.
///
/// Implementations may cache the symbolic analysis between calls. A call with
/// a different size or sparsity pattern redoes the analysis.
pub trait Solve {
    /// Solves `A x = b` in place, where `A` is the `n x n` CSC matrix given by
    /// `Ap`, `Ai` and `Ax`. On success `b` holds `x`.
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), LinearSolveError>;

    /// Drops cached analysis so the next call starts from scratch.
    fn reset(&mut self) {}
}

/// Sparsity pattern a cached symbolic analysis belongs to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pattern {
    n: usize,
    ap: Vec<usize>,
    ai: Vec<usize>,
}

impl Pattern {
    pub(crate) fn new(n: usize, ap: &[usize], ai: &[usize]) -> Self {
        Pattern {
            n,
            ap: ap.to_vec(),
            ai: ai.to_vec(),
        }
    }

    pub(crate) fn matches(&self, n: usize, ap: &[usize], ai: &[usize]) -> bool {
        self.n == n && self.ap == ap && self.ai == ai
    }
}

/// Rejects solutions that came out of a numerically singular factorization.
pub(crate) fn check_finite(x: &[f64]) -> Result<(), LinearSolveError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(LinearSolveError::Singular)
    }
}
