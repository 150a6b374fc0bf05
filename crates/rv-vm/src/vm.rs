//! The VM instance container: everything a running emulated router owns,
//! tied together under one name and one teardown order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rv_memory::PhysicalMemoryMap;
use rv_nio::NioEndpoint;

use crate::config::PlatformConfig;
use crate::interrupt::InterruptRouter;
use crate::slot::SlotFabric;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("vm is in state {0:?}, operation requires {1:?}")]
    WrongState(VmStatus, VmStatus),
    #[error(transparent)]
    Memory(#[from] rv_memory::MemoryError),
    #[error(transparent)]
    Slot(#[from] crate::slot::SlotError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Halted,
    Running,
    Suspended,
    ShutdownInProgress,
}

/// Whether guest RAM is backed by an anonymous heap allocation or a mapped
/// file on disk (so a second process, or a later run, can inspect it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GhostRamStatus {
    None,
    MappedFile(PathBuf),
}

/// Anything that needs an ordered, deterministic teardown hook when the VM
/// is destroyed: a bound device, a registry handle, a spawned worker thread.
pub trait Teardown: Send {
    fn name(&self) -> &str;
    fn shutdown(&mut self);
}

/// A named VM, its sizing, its memory map, its slot fabric, its consoles,
/// and its interrupt routing. Construction only allocates; actual device
/// wiring happens through [`VmInstance::slots`] / [`VmInstance::memory`].
pub struct VmInstance {
    name: String,
    config: PlatformConfig,
    status: VmStatus,
    configuration_register: u16,
    elf_machine_id: u32,
    rom_image_path: Option<PathBuf>,
    ios_image_path: Option<PathBuf>,
    startup_config: Vec<u8>,
    private_config: Vec<u8>,
    memory: PhysicalMemoryMap,
    slots: SlotFabric,
    console: Option<Arc<Mutex<dyn rv_devices::Vtty>>>,
    aux: Option<Arc<Mutex<dyn rv_devices::Vtty>>>,
    chassis_cookie: Vec<u8>,
    interrupts: InterruptRouter,
    ghost_ram: GhostRamStatus,
    teardown_order: Vec<Box<dyn Teardown>>,
}

impl VmInstance {
    pub fn new(name: impl Into<String>, config: PlatformConfig, interrupts: InterruptRouter) -> Self {
        let ram_len = config.ram_size as usize;
        let slot_count = config.slot_count;
        let chassis_cookie = config.chassis_cookie.clone();
        Self {
            name: name.into(),
            memory: PhysicalMemoryMap::new(ram_len),
            slots: SlotFabric::new(slot_count),
            console: None,
            aux: None,
            chassis_cookie,
            interrupts,
            ghost_ram: GhostRamStatus::None,
            teardown_order: Vec::new(),
            status: VmStatus::Halted,
            configuration_register: 0x2102,
            elf_machine_id: 0,
            rom_image_path: None,
            ios_image_path: None,
            startup_config: Vec::new(),
            private_config: Vec::new(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn memory(&mut self) -> &mut PhysicalMemoryMap {
        &mut self.memory
    }

    pub fn slots(&mut self) -> &mut SlotFabric {
        &mut self.slots
    }

    pub fn interrupts(&self) -> &InterruptRouter {
        &self.interrupts
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptRouter {
        &mut self.interrupts
    }

    pub fn configuration_register(&self) -> u16 {
        self.configuration_register
    }

    pub fn set_configuration_register(&mut self, value: u16) {
        self.configuration_register = value;
    }

    pub fn elf_machine_id(&self) -> u32 {
        self.elf_machine_id
    }

    pub fn set_elf_machine_id(&mut self, id: u32) {
        self.elf_machine_id = id;
    }

    pub fn set_rom_image_path(&mut self, path: PathBuf) {
        self.rom_image_path = Some(path);
    }

    pub fn rom_image_path(&self) -> Option<&PathBuf> {
        self.rom_image_path.as_ref()
    }

    pub fn set_ios_image_path(&mut self, path: PathBuf) {
        self.ios_image_path = Some(path);
    }

    pub fn ios_image_path(&self) -> Option<&PathBuf> {
        self.ios_image_path.as_ref()
    }

    pub fn startup_config(&self) -> &[u8] {
        &self.startup_config
    }

    pub fn set_startup_config(&mut self, data: Vec<u8>) {
        self.startup_config = data;
    }

    pub fn private_config(&self) -> &[u8] {
        &self.private_config
    }

    pub fn set_private_config(&mut self, data: Vec<u8>) {
        self.private_config = data;
    }

    pub fn chassis_cookie(&self) -> &[u8] {
        &self.chassis_cookie
    }

    pub fn chassis_cookie_mut(&mut self) -> &mut [u8] {
        &mut self.chassis_cookie
    }

    pub fn set_console(&mut self, vtty: Arc<Mutex<dyn rv_devices::Vtty>>) {
        self.console = Some(vtty);
    }

    pub fn console(&self) -> Option<&Arc<Mutex<dyn rv_devices::Vtty>>> {
        self.console.as_ref()
    }

    pub fn set_aux(&mut self, vtty: Arc<Mutex<dyn rv_devices::Vtty>>) {
        self.aux = Some(vtty);
    }

    pub fn aux(&self) -> Option<&Arc<Mutex<dyn rv_devices::Vtty>>> {
        self.aux.as_ref()
    }

    pub fn ghost_ram_status(&self) -> &GhostRamStatus {
        &self.ghost_ram
    }

    pub fn set_ghost_ram_file(&mut self, path: PathBuf) {
        self.ghost_ram = GhostRamStatus::MappedFile(path);
    }

    /// Registers an object for ordered teardown. Objects are shut down in
    /// the reverse of the order they were registered, mirroring how a real
    /// chassis powers down cards after interfaces and interfaces after
    /// switch bindings.
    pub fn register_teardown(&mut self, obj: Box<dyn Teardown>) {
        tracing::debug!(vm = %self.name, object = obj.name(), "vm: object registered for teardown");
        self.teardown_order.push(obj);
    }

    pub fn start(&mut self) -> Result<(), VmError> {
        if self.status != VmStatus::Halted {
            return Err(VmError::WrongState(self.status, VmStatus::Halted));
        }
        self.status = VmStatus::Running;
        tracing::info!(vm = %self.name, "vm: started");
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<(), VmError> {
        if self.status != VmStatus::Running {
            return Err(VmError::WrongState(self.status, VmStatus::Running));
        }
        self.status = VmStatus::Suspended;
        tracing::info!(vm = %self.name, "vm: suspended");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), VmError> {
        if self.status != VmStatus::Suspended {
            return Err(VmError::WrongState(self.status, VmStatus::Suspended));
        }
        self.status = VmStatus::Running;
        tracing::info!(vm = %self.name, "vm: resumed");
        Ok(())
    }

    /// Walks the teardown list in reverse insertion order, calling each
    /// object's shutdown hook exactly once. Idempotent: a second call finds
    /// an empty list and does nothing.
    pub fn shutdown(&mut self) {
        self.status = VmStatus::ShutdownInProgress;
        tracing::info!(vm = %self.name, count = self.teardown_order.len(), "vm: shutdown beginning");
        while let Some(mut obj) = self.teardown_order.pop() {
            tracing::debug!(vm = %self.name, object = obj.name(), "vm: tearing down object");
            obj.shutdown();
        }
        self.status = VmStatus::Halted;
        tracing::info!(vm = %self.name, "vm: shutdown complete");
    }
}

impl Drop for VmInstance {
    fn drop(&mut self) {
        if !self.teardown_order.is_empty() {
            self.shutdown();
        }
    }
}

/// Convenience wrapper used when a card's NIO needs binding through both the
/// slot fabric and the registry in one step; not itself part of the data
/// model, just a helper call site.
pub fn bind_port_nio(
    slots: &mut SlotFabric,
    slot: usize,
    orig_port_id: u32,
    port_id: u32,
    nio: Arc<NioEndpoint>,
) -> Result<(), VmError> {
    let card = slots.card_mut(slot)?;
    card.bind_nio(orig_port_id, port_id, nio)?;
    Ok(())
}
