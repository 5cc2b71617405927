//! Steady-state AC power flow for multi-phase networks.
//!
//! A [`Network`](prelude::Network) is split into islands, each supplied island
//! is assembled into a nodal model and solved with Newton-Raphson in
//! rectangular coordinates, and the solution is written back to the network.
mod basic;

pub mod prelude {
    use crate::basic;
    pub use basic::*;

    pub use apply::{apply_model, de_energize};
    pub use ecs::{
        network::{
            BranchFlows, BusResults, GridNetwork, PowerFlow, PowerFlowResult, PowerGrid,
            SolverStage,
        },
        plugin::PowerFlowPlugin,
        post_processing::PostProcessing,
    };
    pub use error::{LinearSolveError, PfResult, PowerFlowError};
    pub use flows::{BranchFlow, BusResult, branch_flows, bus_results};
    pub use island::{Island, find_islands};
    pub use model::{PfBranch, PfBus, PfNode, PowerFlowModel, build_model};
    pub use network::{
        Branch, BranchKind, Bus, BusType, Generator, Limit, Network, NetworkEvent, Pair,
        PerUnitBase, Phase, Phases, Zip, admittance,
        units::{KV, MVA, MVar, MW, PerUnit},
    };
    pub use powerflow::{
        IslandOutcome, IslandStatus, PowerFlowConfig, SolveReport, solve, solve_analyzed_with,
        solve_with, solve_with_solver,
    };
    pub use solver::{DefaultSolver, Solve};
}
