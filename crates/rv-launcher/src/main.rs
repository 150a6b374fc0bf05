//! Composition root: parses a handful of startup flags, wires a
//! [`rv_hypervisor::HypervisorContext`] and the `hypervisor`/`vm`/`nio`
//! module tables, binds the control-plane TCP listener, and blocks until
//! the hypervisor `stop` command (or Ctrl-C) tears it down.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rv-launcher", about = "Cisco router hardware emulator core: hypervisor control plane")]
struct Args {
    /// Address the hypervisor TCP control plane listens on.
    #[arg(long, default_value = "127.0.0.1:7200")]
    hypervisor_addr: String,

    /// Printed as the hypervisor's `version` reply.
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    version: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let uuid = process_uuid();
    let version: &'static str = Box::leak(args.version.into_boxed_str());
    let ctx = rv_hypervisor::default_context(version, uuid);

    let server = rv_hypervisor::HypervisorServer::bind(&args.hypervisor_addr, ctx.clone())?;
    tracing::info!(addr = %server.local_addr(), "rv-launcher: hypervisor control plane up");

    // The `hypervisor stop` command is the only supported shutdown trigger;
    // there is no signal-handling crate in this stack to also catch Ctrl-C.
    while ctx.is_active() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    tracing::info!("rv-launcher: shutting down");
    server.join();
    Ok(())
}

/// Builds a process-scoped identifier for the `uuid` hypervisor command.
/// Not a real RFC-4122 UUID (no `uuid` crate in the dependency stack) — a
/// stable-enough per-process token derived from the PID.
fn process_uuid() -> String {
    format!("rv-{:x}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_uuid_is_stable_within_the_process() {
        assert_eq!(process_uuid(), process_uuid());
    }
}
