use thiserror::Error;

use super::network::BusType;

/// Failure reported by a sparse linear solver backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinearSolveError {
    #[error("symbolic analysis failed: {0}")]
    Symbolic(String),
    #[error("numeric factorization failed: {0}")]
    Factorization(String),
    #[error("matrix is singular to working precision")]
    Singular,
}

/// Errors surfaced by network construction, model assembly and result application.
///
/// Non-convergence is not an error; it is reported through
/// [`IslandOutcome`](crate::prelude::IslandOutcome).
#[derive(Error, Debug)]
pub enum PowerFlowError {
    #[error("unknown bus id `{0}`")]
    UnknownBus(String),
    #[error("unknown generator index {0}")]
    UnknownGenerator(usize),
    #[error("unknown branch id `{0}`")]
    UnknownBranch(String),
    #[error("bus id `{0}` already exists")]
    DuplicateBus(String),
    #[error("{component} references phase {phase} which bus `{bus}` does not carry")]
    PhaseMismatch {
        component: String,
        bus: String,
        phase: String,
    },
    #[error("{what}: expected {expected}x{expected}, got {rows}x{cols}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("bus `{bus}` has bus type {bus_type:?} which cannot be solved")]
    InvalidBusType { bus: String, bus_type: BusType },
    #[error("linear solve failed: {0}")]
    LinearSolve(#[from] LinearSolveError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PfResult<T> = Result<T, PowerFlowError>;
