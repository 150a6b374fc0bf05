//! `vm` module: create/start/suspend/stop/list commands over VM instances
//! published in the shared object registry.

use std::sync::{Arc, Mutex};

use rv_vm::{InterruptRouter, PlatformConfig, VmInstance};

use crate::context::HypervisorContext;
use crate::module::Module;
use crate::status::HypervisorError;

const OBJ_TYPE: &str = "vm";

pub fn build() -> Module {
    Module::new("vm")
        .with_command(
            "create",
            Box::new(|ctx, args| {
                let name = args
                    .first()
                    .ok_or_else(|| HypervisorError::bad_param("create requires a vm name"))?;
                let ram_size = args
                    .get(1)
                    .map(|s| s.parse::<u32>())
                    .transpose()
                    .map_err(|_| HypervisorError::bad_param("ram size must be a u32"))?;
                let mut config = PlatformConfig::default();
                if let Some(ram_size) = ram_size {
                    config.ram_size = ram_size;
                }
                let (router, _log) = InterruptRouter::logging();
                let vm = VmInstance::new(name.clone(), config, router);
                ctx.registry.add(name.clone(), OBJ_TYPE, Mutex::new(vm))?;
                Ok(Vec::new())
            }),
        )
        .with_command(
            "list",
            Box::new(|ctx, _args| {
                Ok(ctx
                    .registry
                    .foreach_type(OBJ_TYPE)
                    .into_iter()
                    .map(|info| info.name)
                    .collect())
            }),
        )
        .with_command("start", Box::new(|ctx, args| with_vm(ctx, args, |vm| vm.start().map_err(Into::into))))
        .with_command("suspend", Box::new(|ctx, args| with_vm(ctx, args, |vm| vm.suspend().map_err(Into::into))))
        .with_command("resume", Box::new(|ctx, args| with_vm(ctx, args, |vm| vm.resume().map_err(Into::into))))
        .with_command(
            "stop",
            Box::new(|ctx, args| {
                with_vm(ctx, args, |vm| {
                    vm.shutdown();
                    Ok(())
                })
            }),
        )
        .with_command(
            "delete",
            Box::new(|ctx, args| {
                let name = args
                    .first()
                    .ok_or_else(|| HypervisorError::bad_param("delete requires a vm name"))?;
                ctx.registry.unref(name, OBJ_TYPE)?;
                ctx.registry.delete(name, OBJ_TYPE)?;
                Ok(Vec::new())
            }),
        )
}

fn with_vm(
    ctx: &HypervisorContext,
    args: &[String],
    f: impl FnOnce(&mut VmInstance) -> Result<(), HypervisorError>,
) -> Result<Vec<String>, HypervisorError> {
    let name = args
        .first()
        .ok_or_else(|| HypervisorError::bad_param("command requires a vm name"))?;
    let vm: Arc<Mutex<VmInstance>> = ctx.registry.find(name, OBJ_TYPE)?;
    let result = f(&mut vm.lock().unwrap());
    ctx.registry.unref(name, OBJ_TYPE)?;
    result.map(|_| Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HypervisorContext;
    use std::sync::Arc;

    fn ctx_with_vm_module() -> HypervisorContext {
        let ctx = HypervisorContext::new("0.1.0", "u".into(), Arc::new(rv_registry::Registry::new()));
        ctx.register_module(build());
        ctx
    }

    #[test]
    fn create_then_list_then_start_then_stop() {
        let ctx = ctx_with_vm_module();
        let modules = ctx.modules.lock().unwrap();
        modules.dispatch(&ctx, "vm", "create", &["R1".to_string()]).unwrap();
        let names = modules.dispatch(&ctx, "vm", "list", &[]).unwrap();
        assert_eq!(names, vec!["R1".to_string()]);
        modules.dispatch(&ctx, "vm", "start", &["R1".to_string()]).unwrap();
        modules.dispatch(&ctx, "vm", "stop", &["R1".to_string()]).unwrap();
    }

    #[test]
    fn commands_against_unknown_vm_report_unk_obj() {
        let ctx = ctx_with_vm_module();
        let modules = ctx.modules.lock().unwrap();
        let err = modules.dispatch(&ctx, "vm", "start", &["ghost".to_string()]).unwrap_err();
        assert_eq!(err.status, crate::status::HypervisorStatus::ErrUnkObj);
    }

    #[test]
    fn delete_removes_vm_from_list() {
        let ctx = ctx_with_vm_module();
        let modules = ctx.modules.lock().unwrap();
        modules.dispatch(&ctx, "vm", "create", &["R1".to_string()]).unwrap();
        modules.dispatch(&ctx, "vm", "delete", &["R1".to_string()]).unwrap();
        assert!(modules.dispatch(&ctx, "vm", "list", &[]).unwrap().is_empty());
    }
}
