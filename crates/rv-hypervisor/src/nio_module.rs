//! `nio` module: create/delete/list commands over NIO endpoints published in
//! the shared object registry, backed by [`rv_nio::build_transport`]'s
//! descriptor mini-language.

use std::sync::Mutex;

use rv_nio::{build_transport, NioEndpoint};

use crate::context::HypervisorContext;
use crate::module::Module;
use crate::status::HypervisorError;

const OBJ_TYPE: &str = "nio";

pub fn build() -> Module {
    Module::new("nio")
        .with_command(
            "create",
            Box::new(|ctx, args| {
                let name = args
                    .first()
                    .ok_or_else(|| HypervisorError::bad_param("create requires a nio name"))?;
                let descriptor = args
                    .get(1)
                    .ok_or_else(|| HypervisorError::bad_param("create requires a transport descriptor"))?;
                let transport = build_transport(descriptor)?;
                let endpoint = NioEndpoint::new(name.clone(), transport);
                ctx.registry.add(name.clone(), OBJ_TYPE, Mutex::new(endpoint))?;
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
        .with_command(
            "delete",
            Box::new(|ctx, args| {
                let name = args
                    .first()
                    .ok_or_else(|| HypervisorError::bad_param("delete requires a nio name"))?;
                ctx.registry.unref(name, OBJ_TYPE)?;
                ctx.registry.delete(name, OBJ_TYPE)?;
                Ok(Vec::new())
            }),
        )
}
