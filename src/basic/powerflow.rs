//! Island-by-island power flow over a [`Network`].
use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, error, info, info_span, warn};

use super::apply::{apply_model, de_energize};
use super::error::PfResult;
use super::island::Island;
use super::model::{PowerFlowModel, build_model};
use super::network::{BusType, Network};
use super::newtonpf::{NrFailure, NrStats, newton_pf_rect};
use super::solver::{DefaultSolver, Solve};

/// Solver settings.
#[derive(Debug, Clone, Default, Resource, Serialize, Deserialize)]
pub struct PowerFlowConfig {
    /// Newton iteration cap per run, 100 when unset.
    pub max_it: Option<usize>,
    /// Infinity-norm mismatch tolerance, 1e-8 when unset.
    pub tol: Option<f64>,
    /// Start from nominal voltages instead of the last solution.
    #[serde(default)]
    pub flat_start: bool,
    /// Clamp PV generators at their reactive bounds and re-solve.
    #[serde(default)]
    pub enforce_q_limits: bool,
    /// Solve PV buses whose generators have no reactive range as PQ.
    #[serde(default)]
    pub fixed_q_pv_as_pq: bool,
}

impl PowerFlowConfig {
    pub fn max_it(&self) -> usize {
        self.max_it.unwrap_or(100)
    }

    pub fn tol(&self) -> f64 {
        self.tol.unwrap_or(1e-8)
    }
}

/// What happened to one island in a solve.
#[derive(Debug, Clone, PartialEq)]
pub enum IslandStatus {
    /// No generator reaches the island; it was de-energized.
    Unsupplied,
    Converged { iterations: usize },
    /// The island's network state was left untouched.
    Failed { reason: NrFailure },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IslandOutcome {
    pub island: Island,
    pub status: IslandStatus,
}

/// Per-island outcomes of a solve, in island order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveReport {
    pub outcomes: Vec<IslandOutcome>,
}

impl SolveReport {
    /// True when every supplied island converged.
    pub fn converged(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| !matches!(o.status, IslandStatus::Failed { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &IslandOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, IslandStatus::Failed { .. }))
    }

    pub fn total_iterations(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                IslandStatus::Converged { iterations } => iterations,
                _ => 0,
            })
            .sum()
    }
}

/// Solves `network` with default settings.
///
/// Returns true only if every supplied island converged. Structural errors are
/// logged and reported as false.
pub fn solve(network: &mut Network) -> bool {
    match solve_with(network, &PowerFlowConfig::default()) {
        Ok(report) => report.converged(),
        Err(e) => {
            error!(error = %e, "power flow aborted");
            false
        }
    }
}

/// Solves `network` with the default linear solver.
pub fn solve_with(network: &mut Network, config: &PowerFlowConfig) -> PfResult<SolveReport> {
    solve_with_solver::<DefaultSolver>(network, config)
}

/// Solves `network` with linear solver `S`, one fresh instance per island.
///
/// Models for all supplied islands are built before anything is written, so a
/// structural error leaves the network untouched. Converged islands are
/// applied; failed islands keep their previous state.
pub fn solve_with_solver<S: Solve + Default>(
    network: &mut Network,
    config: &PowerFlowConfig,
) -> PfResult<SolveReport> {
    network.analyze_islands();
    solve_analyzed::<S>(network, config)
}

/// Solves `network` over the islands of its last
/// [`Network::analyze_islands`] call, with the default linear solver.
pub fn solve_analyzed_with(
    network: &mut Network,
    config: &PowerFlowConfig,
) -> PfResult<SolveReport> {
    solve_analyzed::<DefaultSolver>(network, config)
}

fn solve_analyzed<S: Solve + Default>(
    network: &mut Network,
    config: &PowerFlowConfig,
) -> PfResult<SolveReport> {
    let span = info_span!("power_flow");
    let _enter = span.enter();

    let islands = network.islands().to_vec();
    let mut jobs = Vec::new();
    for island in islands.iter().filter(|i| i.is_supplied) {
        let model = build_model(network, |b| b.island() == Some(island.index), config)?;
        jobs.push((island.index, model));
    }

    let results = run_islands::<S>(&mut jobs, config, &span);
    let mut solved: Vec<Option<(PowerFlowModel, Result<NrStats, NrFailure>)>> =
        islands.iter().map(|_| None).collect();
    for ((index, model), result) in jobs.into_iter().zip(results) {
        solved[index] = Some((model, result?));
    }

    let mut report = SolveReport::default();
    for (island, slot) in islands.into_iter().zip(solved) {
        let status = match slot {
            None => {
                de_energize(network, &island);
                debug!(index = island.index, n_bus = island.buses.len(), "island unsupplied");
                IslandStatus::Unsupplied
            }
            Some((model, Ok(stats))) => {
                apply_model(network, &model)?;
                info!(
                    index = island.index,
                    iterations = stats.iterations,
                    mismatch = stats.mismatch,
                    "island converged"
                );
                IslandStatus::Converged {
                    iterations: stats.iterations,
                }
            }
            Some((_, Err(reason))) => {
                warn!(index = island.index, %reason, "island did not converge");
                IslandStatus::Failed { reason }
            }
        };
        report.outcomes.push(IslandOutcome { island, status });
    }
    Ok(report)
}

type IslandResult = PfResult<Result<NrStats, NrFailure>>;

#[cfg(not(feature = "parallel"))]
fn run_islands<S: Solve + Default>(
    jobs: &mut [(usize, PowerFlowModel)],
    config: &PowerFlowConfig,
    parent: &Span,
) -> Vec<IslandResult> {
    jobs.iter_mut()
        .map(|(index, model)| {
            let _span = info_span!(parent: parent, "island", index = *index).entered();
            solve_island(model, config, &mut S::default())
        })
        .collect()
}

#[cfg(feature = "parallel")]
fn run_islands<S: Solve + Default>(
    jobs: &mut [(usize, PowerFlowModel)],
    config: &PowerFlowConfig,
    parent: &Span,
) -> Vec<IslandResult> {
    use rayon::prelude::*;
    jobs.par_iter_mut()
        .map(|(index, model)| {
            let _span = info_span!(parent: parent, "island", index = *index).entered();
            solve_island(model, config, &mut S::default())
        })
        .collect()
}

/// Newton-Raphson on one island, with the optional reactive limit loop.
///
/// Each PV bus can be pinned at most once, so the loop ends after at most one
/// re-solve per PV bus.
fn solve_island<S: Solve>(
    model: &mut PowerFlowModel,
    config: &PowerFlowConfig,
    solver: &mut S,
) -> IslandResult {
    let mut iterations = 0;
    loop {
        let stats = match newton_pf_rect(model, config.tol(), config.max_it(), solver) {
            Ok(stats) => stats,
            Err(failure) => return Ok(Err(failure)),
        };
        iterations += stats.iterations;
        if !config.enforce_q_limits || !clamp_reactive_limits(model) {
            return Ok(Ok(NrStats { iterations, ..stats }));
        }
        model.validate()?;
        solver.reset();
    }
}

/// Pins PV buses whose reactive generation left their bounds. Returns true if
/// any bus was pinned.
fn clamp_reactive_limits(model: &mut PowerFlowModel) -> bool {
    let mut changed = false;
    for bus in model
        .buses
        .iter_mut()
        .filter(|b| b.bus_type == BusType::PV && !b.q_limited)
    {
        let q = bus.q_gen();
        if let Some(bound) = bus.q_limit.clamp(q) {
            let share = bound / bus.nodes.len() as f64;
            bus.nodes.iter_mut().for_each(|n| n.s_gen.im = share);
            bus.q_limited = true;
            debug!(bus = %bus.id, q, bound, "reactive limit hit, solving as PQ");
            changed = true;
        }
    }
    changed
}
