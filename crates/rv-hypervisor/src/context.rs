//! Shared state every command handler closes over: the object registry, the
//! registered module command tables, the process's working directory, and
//! the flag that tells the accept loop to stop taking new connections.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rv_registry::Registry;

use crate::module::ModuleSet;

pub struct HypervisorContext {
    pub registry: Arc<Registry>,
    pub modules: Arc<Mutex<ModuleSet>>,
    pub version: &'static str,
    pub uuid: String,
    working_dir: Mutex<PathBuf>,
    active: Arc<AtomicBool>,
}

impl HypervisorContext {
    pub fn new(version: &'static str, uuid: String, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            modules: Arc::new(Mutex::new(ModuleSet::new())),
            version,
            uuid,
            working_dir: Mutex::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn register_module(&self, module: crate::module::Module) {
        self.modules.lock().unwrap().register(module);
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir.lock().unwrap().clone()
    }

    pub fn set_working_dir(&self, path: impl AsRef<Path>) {
        *self.working_dir.lock().unwrap() = path.as_ref().to_path_buf();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }
}
