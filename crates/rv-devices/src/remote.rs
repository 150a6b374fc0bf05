//! Platform-neutral remote-control window: a 4 KB register block every
//! chassis maps at a platform-specific physical address, used by ROM
//! monitor / bootstrap code to query VM sizing and to drive logging,
//! console I/O, and the ROMMON variable store without a per-platform ABI.

use std::sync::{Arc, Mutex};

use rv_memory::{AccessOp, MemoryBus, MmioDevice};

use crate::rommon::RommonVarStore;
use crate::vtty::Vtty;

pub const ROM_ID: u32 = 0x0041_4258;

/// Sizing and identity fields the guest queries at `0x014..0x02c`; these are
/// not owned by the device itself but supplied by whatever constructed the
/// VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChassisSizes {
    pub ram_size: u32,
    pub rom_size: u32,
    pub nvram_size: u32,
    pub iomem_size: u32,
    pub config_register: u32,
    pub entry_point: u32,
    pub elf_machine_id: u32,
    pub smart_init_iomem_size: u32,
    pub nvram_phys_base: u64,
}

pub trait RemoteControlHost: Send {
    fn cpu_id(&self) -> u32;
    fn dump_registers(&mut self);
    fn dump_mmu(&mut self);
    fn request_stop(&mut self);
    fn log_line(&mut self, source: &str, line: &str);
    fn chassis_cookie(&self, index: usize) -> u32;
}

/// The 64-slot chassis cookie table and VM line buffer the remote-control
/// registers read from / write into.
pub struct RemoteControl {
    sizes: ChassisSizes,
    console: Arc<Mutex<dyn Vtty>>,
    host: Box<dyn RemoteControlHost>,
    rommon: RommonVarStore,

    log_buffer: String,
    cookie_pos: usize,
}

const REG_ROM_ID: u64 = 0x000;
const REG_CPU_ID: u64 = 0x004;
const REG_REG_DUMP: u64 = 0x008;
const REG_MMU_DUMP: u64 = 0x00c;
const REG_RAM_SIZE: u64 = 0x014;
const REG_ROM_SIZE: u64 = 0x018;
const REG_NVRAM_SIZE: u64 = 0x01c;
const REG_IOMEM_SIZE: u64 = 0x020;
const REG_CONF_REG: u64 = 0x024;
const REG_ENTRY_POINT: u64 = 0x028;
const REG_ELF_MACHINE_ID: u64 = 0x02c;
const REG_STOP: u64 = 0x034;
const REG_LOG_STR_PTR: u64 = 0x038;
const REG_LOG_APPEND: u64 = 0x03c;
const REG_CONSOLE_PUTC: u64 = 0x040;
const REG_NVRAM_BASE: u64 = 0x044;
const REG_SMART_INIT_IOMEM: u64 = 0x048;
const REG_COOKIE_POS: u64 = 0x04c;
const REG_COOKIE_DATA: u64 = 0x050;
const REG_ROMMON_WINDOW: u64 = 0x054;
const REG_ROMMON_COMMAND: u64 = 0x058;

const LOG_BUF_CAP: usize = 511;

impl RemoteControl {
    pub fn new(
        sizes: ChassisSizes,
        console: Arc<Mutex<dyn Vtty>>,
        host: Box<dyn RemoteControlHost>,
    ) -> Self {
        Self {
            sizes,
            console,
            host,
            rommon: RommonVarStore::new(),
            log_buffer: String::new(),
            cookie_pos: 0,
        }
    }

    fn append_log_byte(&mut self, byte: u8) {
        if self.log_buffer.len() >= LOG_BUF_CAP {
            self.log_buffer.clear();
            return;
        }
        self.log_buffer.push(byte as char);
        if byte == b'\n' {
            self.host.log_line("ROM", &self.log_buffer);
            self.log_buffer.clear();
        }
    }

    /// Services a register access. Registers that copy data out of guest
    /// memory (`0x038`) need a `MemoryBus`; all others ignore it.
    pub fn access_with_bus(&mut self, offset: u64, size: u8, op: AccessOp, bus: &mut dyn MemoryBus) -> u64 {
        if offset == REG_LOG_STR_PTR {
            if let AccessOp::Write(ptr) = op {
                let mut line = Vec::new();
                let mut addr = ptr;
                for _ in 0..LOG_BUF_CAP {
                    let b = bus.read_u8(addr);
                    if b == 0 {
                        break;
                    }
                    line.push(b);
                    addr += 1;
                }
                self.host.log_line("ROM", &String::from_utf8_lossy(&line));
            }
            return 0;
        }
        self.access(offset, size, op)
    }
}

impl MmioDevice for RemoteControl {
    fn name(&self) -> &str {
        "remote_ctrl"
    }

    fn access(&mut self, offset: u64, size: u8, op: AccessOp) -> u64 {
        let _ = size;
        match offset {
            REG_ROM_ID => match op {
                AccessOp::Read => ROM_ID as u64,
                AccessOp::Write(_) => 0,
            },
            REG_CPU_ID => match op {
                AccessOp::Read => self.host.cpu_id() as u64,
                AccessOp::Write(_) => 0,
            },
            REG_REG_DUMP => {
                if let AccessOp::Write(_) = op {
                    self.host.dump_registers();
                }
                0
            }
            REG_MMU_DUMP => {
                if let AccessOp::Write(_) = op {
                    self.host.dump_mmu();
                }
                0
            }
            REG_RAM_SIZE => read_only(op, self.sizes.ram_size),
            REG_ROM_SIZE => read_only(op, self.sizes.rom_size),
            REG_NVRAM_SIZE => read_only(op, self.sizes.nvram_size),
            REG_IOMEM_SIZE => read_only(op, self.sizes.iomem_size),
            REG_CONF_REG => read_only(op, self.sizes.config_register),
            REG_ENTRY_POINT => read_only(op, self.sizes.entry_point),
            REG_ELF_MACHINE_ID => read_only(op, self.sizes.elf_machine_id),
            REG_STOP => {
                if let AccessOp::Write(_) = op {
                    self.host.request_stop();
                }
                0
            }
            REG_LOG_STR_PTR => 0, // handled by access_with_bus
            REG_LOG_APPEND => {
                if let AccessOp::Write(v) = op {
                    self.append_log_byte(v as u8);
                }
                0
            }
            REG_CONSOLE_PUTC => {
                if let AccessOp::Write(v) = op {
                    self.console.lock().unwrap().write_from_guest(v as u8);
                }
                0
            }
            REG_NVRAM_BASE => read_only(op, self.sizes.nvram_phys_base as u32),
            REG_SMART_INIT_IOMEM => read_only(op, self.sizes.smart_init_iomem_size),
            REG_COOKIE_POS => match op {
                AccessOp::Read => self.cookie_pos as u64,
                AccessOp::Write(v) => {
                    self.cookie_pos = v as usize;
                    0
                }
            },
            REG_COOKIE_DATA => match op {
                AccessOp::Read if self.cookie_pos < 64 => self.host.chassis_cookie(self.cookie_pos) as u64,
                _ => 0,
            },
            REG_ROMMON_WINDOW => match op {
                AccessOp::Read => {
                    let bytes = self.rommon.read_window(0, 4);
                    u32::from_be_bytes(bytes.try_into().unwrap_or([0; 4])) as u64
                }
                AccessOp::Write(v) => {
                    self.rommon.write_window(0, &(v as u32).to_be_bytes());
                    0
                }
            },
            REG_ROMMON_COMMAND => {
                if let AccessOp::Write(v) = op {
                    self.rommon.execute(v as u32);
                }
                0
            }
            _ => {
                tracing::trace!(offset, "remote_ctrl: unknown register, ignoring");
                0
            }
        }
    }
}

fn read_only(op: AccessOp, value: u32) -> u64 {
    match op {
        AccessOp::Read => value as u64,
        AccessOp::Write(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtty::RingVtty;
    use rv_memory::PhysicalMemoryMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeHost {
        stopped: Arc<AtomicBool>,
        lines: Arc<Mutex<Vec<String>>>,
    }
    impl RemoteControlHost for FakeHost {
        fn cpu_id(&self) -> u32 {
            7
        }
        fn dump_registers(&mut self) {}
        fn dump_mmu(&mut self) {}
        fn request_stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn log_line(&mut self, _source: &str, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
        fn chassis_cookie(&self, index: usize) -> u32 {
            index as u32 * 10
        }
    }

    fn make_rc() -> (RemoteControl, Arc<AtomicBool>, Arc<Mutex<Vec<String>>>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let lines = Arc::new(Mutex::new(Vec::new()));
        let host = FakeHost {
            stopped: stopped.clone(),
            lines: lines.clone(),
        };
        let console = Arc::new(Mutex::new(RingVtty::new()));
        let sizes = ChassisSizes {
            ram_size: 256 * 1024 * 1024,
            ..Default::default()
        };
        (RemoteControl::new(sizes, console, Box::new(host)), stopped, lines)
    }

    #[test]
    fn rom_id_and_cpu_id_read_back() {
        let (mut rc, _stop, _lines) = make_rc();
        assert_eq!(rc.access(REG_ROM_ID, 4, AccessOp::Read), ROM_ID as u64);
        assert_eq!(rc.access(REG_CPU_ID, 4, AccessOp::Read), 7);
    }

    #[test]
    fn ram_size_reflects_configured_sizes() {
        let (mut rc, _stop, _lines) = make_rc();
        assert_eq!(rc.access(REG_RAM_SIZE, 4, AccessOp::Read), 256 * 1024 * 1024);
    }

    #[test]
    fn stop_register_invokes_host_stop() {
        let (mut rc, stopped, _lines) = make_rc();
        rc.access(REG_STOP, 4, AccessOp::Write(1));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn log_append_flushes_on_newline() {
        let (mut rc, _stop, lines) = make_rc();
        for b in b"hi\n" {
            rc.access(REG_LOG_APPEND, 1, AccessOp::Write(*b as u64));
        }
        assert_eq!(lines.lock().unwrap().as_slice(), ["hi\n"]);
    }

    #[test]
    fn log_string_pointer_reads_from_guest_memory() {
        let (mut rc, _stop, lines) = make_rc();
        let mut mem = PhysicalMemoryMap::new(0x1000);
        mem.write_physical(0x40, b"booted\0");
        rc.access_with_bus(REG_LOG_STR_PTR, 4, AccessOp::Write(0x40), &mut mem);
        assert_eq!(lines.lock().unwrap().as_slice(), ["booted"]);
    }

    #[test]
    fn cookie_position_then_data_returns_host_value() {
        let (mut rc, _stop, _lines) = make_rc();
        rc.access(REG_COOKIE_POS, 4, AccessOp::Write(3));
        assert_eq!(rc.access(REG_COOKIE_DATA, 4, AccessOp::Read), 30);
    }
}
