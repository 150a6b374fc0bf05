//! Command tables: each module owns a name and a map from command name to
//! handler. The core module (always present) plus whatever module tables
//! a platform/launcher layer registers make up a [`ModuleSet`].

use std::collections::HashMap;

use crate::context::HypervisorContext;
use crate::status::HypervisorError;

pub type Handler = Box<dyn Fn(&HypervisorContext, &[String]) -> Result<Vec<String>, HypervisorError> + Send + Sync>;

pub struct Module {
    name: String,
    commands: HashMap<String, Handler>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: HashMap::new(),
        }
    }

    pub fn with_command(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.commands.insert(name.into(), handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn dispatch(
        &self,
        ctx: &HypervisorContext,
        command: &str,
        args: &[String],
    ) -> Result<Vec<String>, HypervisorError> {
        let handler = self
            .commands
            .get(command)
            .ok_or_else(|| HypervisorError::unk_cmd(&self.name, command))?;
        handler(ctx, args)
    }
}

#[derive(Default)]
pub struct ModuleSet {
    modules: Vec<Module>,
}

impl ModuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Module) {
        self.modules.push(module);
    }

    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.iter().map(Module::name).collect();
        names.sort_unstable();
        names
    }

    pub fn command_names(&self, module: &str) -> Result<Vec<&str>, HypervisorError> {
        self.modules
            .iter()
            .find(|m| m.name() == module)
            .map(Module::command_names)
            .ok_or_else(|| HypervisorError::unk_module(module))
    }

    pub fn dispatch(
        &self,
        ctx: &HypervisorContext,
        module: &str,
        command: &str,
        args: &[String],
    ) -> Result<Vec<String>, HypervisorError> {
        let m = self
            .modules
            .iter()
            .find(|m| m.name() == module)
            .ok_or_else(|| HypervisorError::unk_module(module))?;
        m.dispatch(ctx, command, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HypervisorContext;
    use std::sync::Arc;

    fn test_ctx() -> HypervisorContext {
        HypervisorContext::new("0.1.0", "test-uuid".to_string(), Arc::new(rv_registry::Registry::new()))
    }

    #[test]
    fn unknown_module_is_reported() {
        let set = ModuleSet::new();
        let ctx = test_ctx();
        let err = set.dispatch(&ctx, "nope", "anything", &[]).unwrap_err();
        assert_eq!(err.status, crate::status::HypervisorStatus::ErrUnkModule);
    }

    #[test]
    fn unknown_command_within_known_module_is_reported() {
        let mut set = ModuleSet::new();
        set.register(Module::new("demo").with_command("ping", Box::new(|_, _| Ok(vec!["pong".into()]))));
        let ctx = test_ctx();
        let err = set.dispatch(&ctx, "demo", "bogus", &[]).unwrap_err();
        assert_eq!(err.status, crate::status::HypervisorStatus::ErrUnkCmd);
    }

    #[test]
    fn known_command_dispatches_and_returns_reply_lines() {
        let mut set = ModuleSet::new();
        set.register(Module::new("demo").with_command("ping", Box::new(|_, _| Ok(vec!["pong".into()]))));
        let ctx = test_ctx();
        let reply = set.dispatch(&ctx, "demo", "ping", &[]).unwrap();
        assert_eq!(reply, vec!["pong".to_string()]);
    }
}
