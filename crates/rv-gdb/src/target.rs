//! The narrow contract this crate needs from whatever plays "the CPU" for a
//! VM (out of scope for this core, same boundary as `rv_memory::MemoryBus`).

/// Software or hardware breakpoint kind, mirroring the `Z0`/`Z1` wire
/// distinction (software vs. hardware watchpoint set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Software,
    Hardware,
}

impl BreakpointKind {
    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(BreakpointKind::Software),
            1 => Some(BreakpointKind::Hardware),
            _ => None,
        }
    }
}

pub trait GdbTarget: Send {
    /// Unix signal number to report for `?`/a stop reply (5 = SIGTRAP by
    /// convention for "stopped at a breakpoint").
    fn last_signal(&self) -> u8;

    fn read_registers(&self) -> Vec<u8>;
    fn write_registers(&mut self, data: &[u8]);
    fn read_register(&self, n: usize) -> Option<Vec<u8>>;
    fn write_register(&mut self, n: usize, data: &[u8]) -> bool;

    fn read_memory(&mut self, addr: u64, len: usize) -> Vec<u8>;
    fn write_memory(&mut self, addr: u64, data: &[u8]);

    /// Resumes execution, optionally relocating the PC first. Returns once
    /// the target has stopped again (breakpoint hit, step completed, or an
    /// external stop request).
    fn cont(&mut self, addr: Option<u64>);
    fn step(&mut self, addr: Option<u64>);

    fn insert_breakpoint(&mut self, kind: BreakpointKind, addr: u64, len: usize) -> bool;
    fn remove_breakpoint(&mut self, kind: BreakpointKind, addr: u64, len: usize) -> bool;

    /// `k`: kill the VM outright.
    fn kill(&mut self);
    /// `D`: detach, leaving the VM running.
    fn detach(&mut self);
    /// Interrupt byte (0x03) received outside a packet: stop the CPU thread.
    fn interrupt(&mut self);

    fn thread_id(&self) -> u64 {
        1
    }
}

/// An in-memory `GdbTarget` used for tests and as a starting point for a
/// real CPU collaborator: a flat register file, a byte-addressable memory
/// buffer, and a breakpoint set recorded but not actually enforced (there is
/// no instruction stream to halt on here).
pub struct MockTarget {
    pub registers: Vec<u8>,
    pub memory: Vec<u8>,
    pub breakpoints: Vec<(BreakpointKind, u64, usize)>,
    pub running: bool,
    pub killed: bool,
    pub detached: bool,
    pub last_signal: u8,
}

impl MockTarget {
    pub fn new(register_bytes: usize, memory_size: usize) -> Self {
        Self {
            registers: vec![0u8; register_bytes],
            memory: vec![0u8; memory_size],
            breakpoints: Vec::new(),
            running: false,
            killed: false,
            detached: false,
            last_signal: 5,
        }
    }
}

impl GdbTarget for MockTarget {
    fn last_signal(&self) -> u8 {
        self.last_signal
    }

    fn read_registers(&self) -> Vec<u8> {
        self.registers.clone()
    }

    fn write_registers(&mut self, data: &[u8]) {
        let n = data.len().min(self.registers.len());
        self.registers[..n].copy_from_slice(&data[..n]);
    }

    fn read_register(&self, n: usize) -> Option<Vec<u8>> {
        let width = 4;
        let start = n * width;
        if start + width > self.registers.len() {
            return None;
        }
        Some(self.registers[start..start + width].to_vec())
    }

    fn write_register(&mut self, n: usize, data: &[u8]) -> bool {
        let width = 4;
        let start = n * width;
        if start + width > self.registers.len() {
            return false;
        }
        self.registers[start..start + width].copy_from_slice(&data[..width.min(data.len())]);
        true
    }

    fn read_memory(&mut self, addr: u64, len: usize) -> Vec<u8> {
        let start = addr as usize;
        let end = (start + len).min(self.memory.len());
        if start >= self.memory.len() {
            return Vec::new();
        }
        self.memory[start..end].to_vec()
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) {
        let start = addr as usize;
        let end = (start + data.len()).min(self.memory.len());
        if start < self.memory.len() {
            self.memory[start..end].copy_from_slice(&data[..end - start]);
        }
    }

    fn cont(&mut self, addr: Option<u64>) {
        if let Some(addr) = addr {
            self.write_register(15, &(addr as u32).to_le_bytes());
        }
        self.running = true;
    }

    fn step(&mut self, addr: Option<u64>) {
        if let Some(addr) = addr {
            self.write_register(15, &(addr as u32).to_le_bytes());
        }
        self.running = false;
    }

    fn insert_breakpoint(&mut self, kind: BreakpointKind, addr: u64, len: usize) -> bool {
        self.breakpoints.push((kind, addr, len));
        true
    }

    fn remove_breakpoint(&mut self, kind: BreakpointKind, addr: u64, len: usize) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|&(k, a, l)| !(k == kind && a == addr && l == len));
        self.breakpoints.len() != before
    }

    fn kill(&mut self) {
        self.killed = true;
        self.running = false;
    }

    fn detach(&mut self) {
        self.detached = true;
        self.running = true;
    }

    fn interrupt(&mut self) {
        self.running = false;
    }
}
