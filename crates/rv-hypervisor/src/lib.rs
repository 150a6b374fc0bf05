//! The hypervisor control plane: a TCP line server that tokenizes commands,
//! dispatches them to per-module command tables, and replies with the
//! `NNN[-| ]text\r\n` status framing.

pub mod context;
pub mod core_module;
pub mod module;
pub mod nio_module;
pub mod parser;
pub mod server;
pub mod status;
pub mod vm_module;

pub use context::HypervisorContext;
pub use module::{Module, ModuleSet};
pub use parser::{parse_command, Command};
pub use server::HypervisorServer;
pub use status::{HypervisorError, HypervisorStatus};

use std::sync::Arc;

use rv_registry::Registry;

/// Builds a context with the core, `vm`, and `nio` modules already
/// registered — the baseline a launcher binds a [`HypervisorServer`] to.
pub fn default_context(version: &'static str, uuid: String) -> Arc<HypervisorContext> {
    let ctx = Arc::new(HypervisorContext::new(version, uuid, Arc::new(Registry::new())));
    ctx.register_module(core_module::build());
    ctx.register_module(vm_module::build());
    ctx.register_module(nio_module::build());
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_registers_all_three_modules() {
        let ctx = default_context("0.1.0", "u".into());
        let modules = ctx.modules.lock().unwrap();
        let mut names = modules.module_names();
        names.sort();
        assert_eq!(names, vec!["hypervisor", "nio", "vm"]);
    }
}
