//! Per-VM physical address space: a flat RAM region plus a sparse, ordered
//! set of MMIO device intervals.
//!
//! Every multi-byte access states its width at the call site
//! (`read_be16`/`read_be32`/...) rather than relying on the host's native
//! endianness — every platform this core targets is big-endian on the wire.

use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("device {name:?} interval [{base:#x}, {end:#x}) overlaps existing device {other:?}")]
    Overlap {
        name: String,
        base: u64,
        end: u64,
        other: String,
    },
    #[error("access size {0} is not one of 1, 2, 4, 8")]
    BadAccessSize(u8),
}

/// The narrow contract this crate needs from whatever plays the role of
/// "the CPU" (out of scope for this core): a byte-addressable read/write
/// surface over guest physical memory.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_u8(&mut self, paddr: u64) -> u8 {
        let mut b = [0u8; 1];
        self.read_physical(paddr, &mut b);
        b[0]
    }
    fn write_u8(&mut self, paddr: u64, v: u8) {
        self.write_physical(paddr, &[v]);
    }
    fn read_be16(&mut self, paddr: u64) -> u16 {
        let mut b = [0u8; 2];
        self.read_physical(paddr, &mut b);
        u16::from_be_bytes(b)
    }
    fn write_be16(&mut self, paddr: u64, v: u16) {
        self.write_physical(paddr, &v.to_be_bytes());
    }
    fn read_be32(&mut self, paddr: u64) -> u32 {
        let mut b = [0u8; 4];
        self.read_physical(paddr, &mut b);
        u32::from_be_bytes(b)
    }
    fn write_be32(&mut self, paddr: u64, v: u32) {
        self.write_physical(paddr, &v.to_be_bytes());
    }
    fn read_be64(&mut self, paddr: u64) -> u64 {
        let mut b = [0u8; 8];
        self.read_physical(paddr, &mut b);
        u64::from_be_bytes(b)
    }
    fn write_be64(&mut self, paddr: u64, v: u64) {
        self.write_physical(paddr, &v.to_be_bytes());
    }
}

/// One `{1,2,4,8}`-byte access, read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Read,
    Write(u64),
}

/// An MMIO peripheral pluggable into a [`PhysicalMemoryMap`]. `offset` is
/// already relative to the device's base address.
pub trait MmioDevice: Send {
    fn name(&self) -> &str;
    /// Services one access. For reads the return value is the data read
    /// (only the low `size*8` bits are meaningful); for writes the return
    /// value is ignored.
    fn access(&mut self, offset: u64, size: u8, op: AccessOp) -> u64;
}

struct MappedDevice {
    name: String,
    base: u64,
    len: u64,
    handler: Arc<Mutex<dyn MmioDevice>>,
}

/// A VM's guest-physical address space: RAM at `[0, ram_len)` plus an ordered
/// list of device intervals elsewhere. Unmapped accesses are absorbed
/// (zero-on-read, discarded-on-write) rather than treated as fatal — a
/// misbehaving guest must never bring the emulator down.
pub struct PhysicalMemoryMap {
    ram: Vec<u8>,
    devices: Vec<MappedDevice>,
}

impl PhysicalMemoryMap {
    pub fn new(ram_len: usize) -> Self {
        Self {
            ram: vec![0u8; ram_len],
            devices: Vec::new(),
        }
    }

    pub fn ram_len(&self) -> u64 {
        self.ram.len() as u64
    }

    /// Binds `device` at `[base, base+len)`. Rejects overlap with RAM or any
    /// already-bound device; this is a configuration error meant to abort VM
    /// startup, not something absorbed at runtime.
    pub fn bind_device(
        &mut self,
        base: u64,
        len: u64,
        device: Arc<Mutex<dyn MmioDevice>>,
    ) -> Result<(), MemoryError> {
        let name = device.lock().unwrap().name().to_string();
        let end = base + len;
        if base < self.ram_len() {
            return Err(MemoryError::Overlap {
                name,
                base,
                end,
                other: "ram".to_string(),
            });
        }
        for existing in &self.devices {
            let existing_end = existing.base + existing.len;
            if base < existing_end && existing.base < end {
                return Err(MemoryError::Overlap {
                    name,
                    base,
                    end,
                    other: existing.name.clone(),
                });
            }
        }
        let idx = self.devices.partition_point(|d| d.base < base);
        self.devices.insert(
            idx,
            MappedDevice {
                name: name.clone(),
                base,
                len,
                handler: device,
            },
        );
        tracing::debug!(name, base, len, "memory: device bound");
        Ok(())
    }

    /// Removes a device by name. Idempotent: unbinding something not present
    /// is a no-op, matching the shutdown path where devices may be unbound
    /// from any order.
    pub fn unbind_device(&mut self, name: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.name != name);
        let removed = self.devices.len() != before;
        if removed {
            tracing::debug!(name, "memory: device unbound");
        }
        removed
    }

    fn find_device(&self, addr: u64) -> Option<&MappedDevice> {
        let idx = self.devices.partition_point(|d| d.base <= addr);
        if idx == 0 {
            return None;
        }
        let candidate = &self.devices[idx - 1];
        if addr >= candidate.base && addr < candidate.base + candidate.len {
            Some(candidate)
        } else {
            None
        }
    }

    fn dispatch(&mut self, addr: u64, size: u8, op: AccessOp) -> u64 {
        if addr + size as u64 <= self.ram_len() {
            return match op {
                AccessOp::Read => {
                    let mut buf = [0u8; 8];
                    buf[..size as usize]
                        .copy_from_slice(&self.ram[addr as usize..addr as usize + size as usize]);
                    u64::from_be_bytes(buf) >> ((8 - size) * 8)
                }
                AccessOp::Write(value) => {
                    let bytes = value.to_be_bytes();
                    let start = 8 - size as usize;
                    self.ram[addr as usize..addr as usize + size as usize]
                        .copy_from_slice(&bytes[start..]);
                    0
                }
            };
        }
        if let Some(dev) = self.find_device(addr) {
            let offset = addr - dev.base;
            return dev.handler.lock().unwrap().access(offset, size, op);
        }
        match op {
            AccessOp::Read => {
                tracing::trace!(addr, size, "memory: unmapped read, returning zero");
                0
            }
            AccessOp::Write(_) => {
                tracing::trace!(addr, size, "memory: unmapped write, discarded");
                0
            }
        }
    }
}

impl MemoryBus for PhysicalMemoryMap {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.dispatch(paddr + i as u64, 1, AccessOp::Read) as u8;
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        for (i, b) in buf.iter().enumerate() {
            self.dispatch(paddr + i as u64, 1, AccessOp::Write(*b as u64));
        }
    }
}

impl PhysicalMemoryMap {
    /// Width-aware accessor used by callers that want a single device access
    /// (rather than byte-at-a-time via [`MemoryBus`]) — this is how the
    /// dispatcher itself is exercised, and how a real CPU collaborator would
    /// drive it for aligned register-sized loads/stores.
    pub fn access(&mut self, addr: u64, size: u8, op: AccessOp) -> Result<u64, MemoryError> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(MemoryError::BadAccessSize(size));
        }
        Ok(self.dispatch(addr, size, op))
    }
}
