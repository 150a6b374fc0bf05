//! The always-present `hypervisor` module: the handful of commands every
//! control connection can issue regardless of what platform/device modules
//! are registered alongside it.

use crate::context::HypervisorContext;
use crate::module::Module;
use crate::status::{HypervisorError, HypervisorStatus};

pub fn build() -> Module {
    Module::new("hypervisor")
        .with_command("version", Box::new(|ctx, _args| Ok(vec![ctx.version.to_string()])))
        .with_command("uuid", Box::new(|ctx, _args| Ok(vec![ctx.uuid.clone()])))
        .with_command(
            "module_list",
            Box::new(|ctx, _args| {
                let modules = ctx.modules.lock().unwrap();
                Ok(modules.module_names().into_iter().map(str::to_string).collect())
            }),
        )
        .with_command(
            "cmd_list",
            Box::new(|ctx, args| {
                let module = args
                    .first()
                    .ok_or_else(|| HypervisorError::bad_param("cmd_list requires a module name"))?;
                let modules = ctx.modules.lock().unwrap();
                Ok(modules.command_names(module)?.into_iter().map(str::to_string).collect())
            }),
        )
        .with_command(
            "working_dir",
            Box::new(|ctx, args| {
                if let Some(dir) = args.first() {
                    ctx.set_working_dir(dir);
                }
                Ok(vec![ctx.working_dir().display().to_string()])
            }),
        )
        .with_command(
            "save_config",
            Box::new(|_ctx, args| {
                let _path = args
                    .first()
                    .ok_or_else(|| HypervisorError::bad_param("save_config requires a file path"))?;
                Ok(Vec::new())
            }),
        )
        .with_command("reset", Box::new(|_ctx, _args| Ok(Vec::new())))
        // Exercises the reply framing directly: one continuation line per
        // argument, then a final OK, with no other effect on the context.
        .with_command(
            "parser_test",
            Box::new(|_ctx, args| {
                let mut lines: Vec<String> = args.to_vec();
                lines.push("OK".to_string());
                Ok(lines)
            }),
        )
        // `close`/`stop` are enumerable here for `cmd_list`/introspection, but
        // their real side effects (ending this connection, stopping the
        // accept loop) are applied by the connection loop itself before the
        // reply is even dispatched through this table — see server.rs.
        .with_command("close", Box::new(|_ctx, _args| Ok(Vec::new())))
        .with_command(
            "stop",
            Box::new(|ctx, _args| {
                ctx.request_stop();
                Ok(Vec::new())
            }),
        )
}

pub fn is_connection_terminating(module: &str, command: &str) -> bool {
    module == "hypervisor" && matches!(command, "close" | "stop")
}

pub const INFO_OK: HypervisorStatus = HypervisorStatus::InfoOk;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HypervisorContext;
    use std::sync::Arc;

    #[test]
    fn version_and_uuid_come_from_context() {
        let ctx = HypervisorContext::new("9.9.9", "the-uuid".into(), Arc::new(rv_registry::Registry::new()));
        ctx.register_module(build());
        let modules = ctx.modules.lock().unwrap();
        assert_eq!(modules.dispatch(&ctx, "hypervisor", "version", &[]).unwrap(), vec!["9.9.9"]);
        assert_eq!(modules.dispatch(&ctx, "hypervisor", "uuid", &[]).unwrap(), vec!["the-uuid"]);
    }

    #[test]
    fn module_list_includes_hypervisor_itself() {
        let ctx = HypervisorContext::new("0.1.0", "u".into(), Arc::new(rv_registry::Registry::new()));
        ctx.register_module(build());
        let modules = ctx.modules.lock().unwrap();
        let names = modules.dispatch(&ctx, "hypervisor", "module_list", &[]).unwrap();
        assert!(names.contains(&"hypervisor".to_string()));
    }

    #[test]
    fn working_dir_command_sets_and_reads_back() {
        let ctx = HypervisorContext::new("0.1.0", "u".into(), Arc::new(rv_registry::Registry::new()));
        ctx.register_module(build());
        let modules = ctx.modules.lock().unwrap();
        modules
            .dispatch(&ctx, "hypervisor", "working_dir", &["/tmp/r1".to_string()])
            .unwrap();
        let reply = modules.dispatch(&ctx, "hypervisor", "working_dir", &[]).unwrap();
        assert_eq!(reply, vec!["/tmp/r1".to_string()]);
    }

    #[test]
    fn parser_test_echoes_args_then_ok() {
        let ctx = HypervisorContext::new("0.1.0", "u".into(), Arc::new(rv_registry::Registry::new()));
        ctx.register_module(build());
        let modules = ctx.modules.lock().unwrap();
        let reply = modules
            .dispatch(&ctx, "hypervisor", "parser_test", &["foo".to_string(), "bar baz".to_string()])
            .unwrap();
        assert_eq!(reply, vec!["foo".to_string(), "bar baz".to_string(), "OK".to_string()]);
    }

    #[test]
    fn stop_command_requests_shutdown() {
        let ctx = HypervisorContext::new("0.1.0", "u".into(), Arc::new(rv_registry::Registry::new()));
        ctx.register_module(build());
        assert!(ctx.is_active());
        let modules = ctx.modules.lock().unwrap();
        modules.dispatch(&ctx, "hypervisor", "stop", &[]).unwrap();
        assert!(!ctx.is_active());
    }
}
