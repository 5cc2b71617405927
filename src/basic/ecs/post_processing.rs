use bevy_app::App;
use bevy_ecs::{prelude::*, system::RunSystemOnce};
use num_complex::Complex64;
use tabled::{Table, settings::Style};
use tracing::warn;

mod res_display;
use res_display::*;

use super::network::*;
use super::plugin::extract_results;

/// Bus result table with physical units.
fn res_bus_table(net: Res<GridNetwork>, results: Res<BusResults>) -> String {
    let base = net.base;
    let mut rows = Vec::new();
    for r in results.iter() {
        let Some(bus) = net.bus(&r.bus) else {
            continue;
        };
        for (k, phase) in bus.phases.iter().enumerate() {
            let v = r.v.get(k).copied().unwrap_or_default();
            let s_gen = r.s_gen.get(k).copied().unwrap_or_default();
            let s_load = r.s_load.get(k).copied().unwrap_or_default();
            let (p_gen, q_gen) = base.power_to_physical(s_gen);
            let (p_load, q_load) = base.power_to_physical(s_load);
            rows.push(BusResTable {
                bus: r.bus.clone(),
                phase: phase.to_string(),
                vm_pu: FloatWrapper::new(v.norm(), 5),
                va_degree: FloatWrapper::new(v.arg().to_degrees(), 5),
                vm_kv: FloatWrapper::new(base.voltage_to_physical(v, bus.v_base).norm(), 3),
                p_gen_mw: FloatWrapper::new(*p_gen, 3),
                q_gen_mvar: FloatWrapper::new(*q_gen, 3),
                p_load_mw: FloatWrapper::new(*p_load, 3),
                q_load_mvar: FloatWrapper::new(*q_load, 3),
            });
        }
    }
    Table::new(rows).with(Style::markdown()).to_string()
}

/// Branch flow table in MW / MVAr.
fn res_line_table(net: Res<GridNetwork>, flows: Res<BranchFlows>) -> String {
    let base = net.base;
    let rows = flows.iter().zip(net.branches()).map(|(f, br)| {
        let s_from: Complex64 = f.s_from.iter().sum();
        let s_to: Complex64 = f.s_to.iter().sum();
        let (p_from, q_from) = base.power_to_physical(s_from);
        let (p_to, q_to) = base.power_to_physical(s_to);
        let (pl, ql) = base.power_to_physical(f.loss());
        LineResTable {
            branch: f.branch.clone(),
            from: br.bus0.clone(),
            to: br.bus1.clone(),
            p_from_mw: FloatWrapper::new(*p_from, 3),
            q_from_mvar: FloatWrapper::new(*q_from, 3),
            p_to_mw: FloatWrapper::new(*p_to, 3),
            q_to_mvar: FloatWrapper::new(*q_to, 3),
            pl_mw: FloatWrapper::new(*pl, 3),
            ql_mvar: FloatWrapper::new(*ql, 3),
        }
    });
    Table::new(rows).with(Style::markdown()).to_string()
}

fn run_table<M>(world: &mut World, system: impl IntoSystem<(), String, M>) -> String {
    world.run_system_once(system).unwrap_or_else(|e| {
        warn!(error = %e, "result table unavailable");
        String::new()
    })
}

/// Trait for post-processing after a power flow simulation.
pub trait PostProcessing {
    /// Re-extracts bus results and branch flows from the current voltages.
    fn post_process(&mut self);

    /// Markdown table of bus results.
    fn res_bus(&mut self) -> String;

    /// Markdown table of branch flows.
    fn res_line(&mut self) -> String;

    fn print_res_bus(&mut self) {
        println!("{}", self.res_bus());
    }

    fn print_res_line(&mut self) {
        println!("{}", self.res_line());
    }
}

impl PostProcessing for World {
    fn post_process(&mut self) {
        if let Err(e) = self.run_system_once(extract_results) {
            warn!(error = %e, "result extraction skipped");
        }
    }

    fn res_bus(&mut self) -> String {
        run_table(self, res_bus_table)
    }

    fn res_line(&mut self) -> String {
        run_table(self, res_line_table)
    }
}

impl PostProcessing for App {
    fn post_process(&mut self) {
        self.world_mut().post_process();
    }

    fn res_bus(&mut self) -> String {
        self.world_mut().res_bus()
    }

    fn res_line(&mut self) -> String {
        self.world_mut().res_line()
    }
}

impl PostProcessing for PowerGrid {
    fn post_process(&mut self) {
        self.world_mut().post_process();
    }

    fn res_bus(&mut self) -> String {
        self.world_mut().res_bus()
    }

    fn res_line(&mut self) -> String {
        self.world_mut().res_line()
    }
}
