use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};

use super::plugin::PowerFlowPlugin;
use crate::basic::flows::{BranchFlow, BusResult};
use crate::basic::network::Network;
use crate::basic::powerflow::{PowerFlowConfig, SolveReport};

#[derive(Clone, SystemSet, Debug, Hash, PartialEq, Eq)]
pub enum SolverStage {
    BeforeSolve,
    Solve,
    AfterSolve,
}

/// The network being solved, held as an ECS resource.
#[derive(Debug, Default, Resource, Deref, DerefMut)]
pub struct GridNetwork(pub Network);

/// Outcome of the last solve.
#[derive(Debug, Default, Clone, Resource)]
pub struct PowerFlowResult {
    pub report: SolveReport,
    pub converged: bool,
    /// Set when the solve aborted on a structural error.
    pub error: Option<String>,
}

/// Per-bus results extracted after the last solve.
#[derive(Debug, Default, Clone, Resource, Deref)]
pub struct BusResults(pub Vec<BusResult>);

/// Per-branch flows extracted after the last solve.
#[derive(Debug, Default, Clone, Resource, Deref)]
pub struct BranchFlows(pub Vec<BranchFlow>);

/// Represents the power grid, managing the ECS world for power flow calculations.
#[derive(Default)]
pub struct PowerGrid {
    data_storage: App,
}

/// Trait for defining power flow operations, such as initializing and running
/// the power flow calculation.
pub trait PowerFlow {
    /// Registers the solver resources and systems.
    fn init_pf_net(&mut self);

    /// Runs one solve of the current network.
    fn run_pf(&mut self);
}

impl PowerFlow for PowerGrid {
    fn init_pf_net(&mut self) {
        if !self.app().is_plugin_added::<PowerFlowPlugin>() {
            self.app_mut().add_plugins(PowerFlowPlugin);
        }
    }

    fn run_pf(&mut self) {
        self.app_mut().update();
    }
}

impl PowerGrid {
    pub fn new(network: Network) -> Self {
        let mut grid = PowerGrid::default();
        grid.world_mut().insert_resource(GridNetwork(network));
        grid
    }

    pub fn app(&self) -> &App {
        &self.data_storage
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.data_storage
    }

    pub fn world(&self) -> &World {
        self.app().world()
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.app_mut().world_mut()
    }

    pub fn network(&self) -> Option<&Network> {
        self.world().get_resource::<GridNetwork>().map(|n| &n.0)
    }

    pub fn network_mut(&mut self) -> Option<Mut<'_, GridNetwork>> {
        self.world_mut().get_resource_mut::<GridNetwork>()
    }

    pub fn set_config(&mut self, config: PowerFlowConfig) {
        self.world_mut().insert_resource(config);
    }

    pub fn result(&self) -> Option<&PowerFlowResult> {
        self.world().get_resource::<PowerFlowResult>()
    }
}
