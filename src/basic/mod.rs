pub mod apply;
pub mod error;
pub mod flows;
pub mod island;
pub(crate) mod jacobian;
pub mod model;
pub mod network;
pub(crate) mod newtonpf;
pub mod powerflow;
pub mod solver;

pub mod ecs;

pub use newtonpf::{NrFailure, NrStats, newton_pf_rect};
