use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use tracing::{error, warn};

use super::network::*;
use crate::basic::flows::{branch_flows, bus_results};
use crate::basic::powerflow::{PowerFlowConfig, solve_analyzed_with};

/// Registers the power flow resources and the per-update solve pipeline.
///
/// Each `Update` runs island analysis, the solve and result extraction, in
/// [`SolverStage`] order. A [`GridNetwork`] inserted before the plugin is kept.
pub struct PowerFlowPlugin;

impl Plugin for PowerFlowPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PowerFlowConfig>()
            .init_resource::<GridNetwork>()
            .init_resource::<PowerFlowResult>()
            .init_resource::<BusResults>()
            .init_resource::<BranchFlows>()
            .configure_sets(
                Update,
                (SolverStage::BeforeSolve, SolverStage::Solve, SolverStage::AfterSolve).chain(),
            )
            .add_systems(
                Update,
                (
                    analyze_islands.in_set(SolverStage::BeforeSolve),
                    ecs_run_pf.in_set(SolverStage::Solve),
                    extract_results.in_set(SolverStage::AfterSolve),
                ),
            );
    }
}

/// Refreshes island membership so systems in `BeforeSolve` can inspect it.
pub fn analyze_islands(mut net: ResMut<GridNetwork>) {
    net.analyze_islands();
}

/// ECS system that runs the power flow with the current configuration, over
/// the islands found in `BeforeSolve`.
pub fn ecs_run_pf(
    mut net: ResMut<GridNetwork>,
    cfg: Res<PowerFlowConfig>,
    mut res: ResMut<PowerFlowResult>,
) {
    *res = match solve_analyzed_with(&mut net, &cfg) {
        Ok(report) => {
            if !report.converged() {
                warn!(
                    failed = report.failed().count(),
                    "power flow did not converge on every island"
                );
            }
            PowerFlowResult {
                converged: report.converged(),
                report,
                error: None,
            }
        }
        Err(e) => {
            error!(error = %e, "power flow aborted");
            PowerFlowResult {
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    };
}

/// Extracts bus results and branch flows from the network voltages.
pub fn extract_results(
    net: Res<GridNetwork>,
    mut buses: ResMut<BusResults>,
    mut flows: ResMut<BranchFlows>,
) {
    buses.0 = bus_results(&net);
    flows.0 = branch_flows(&net).unwrap_or_else(|e| {
        error!(error = %e, "branch flow extraction failed");
        Vec::new()
    });
}
