//! NS16552 dual UART: two independent channels sharing a register file laid
//! out per channel as `{RBR/THR, IER, IIR, LCR, MCR, LSR}` at offsets 0..5,
//! addressed through a configurable byte-shift divisor (registers are
//! commonly spaced every 4 bytes on a 32-bit bus rather than packed).

use std::sync::{Arc, Mutex};

use rv_memory::{AccessOp, MmioDevice};

use crate::vtty::Vtty;

const REG_RBR_THR: u64 = 0;
const REG_IER: u64 = 1;
const REG_IIR: u64 = 2;
const REG_LCR: u64 = 3;
const REG_MCR: u64 = 4;
const REG_LSR: u64 = 5;

const IER_ERXRDY: u8 = 0x01;
const IER_ETXRDY: u8 = 0x02;

const LSR_RX_READY: u8 = 0x01;
const LSR_TX_EMPTY: u8 = 0x20;

const LCR_DLAB: u8 = 0x80;

struct Channel {
    vtty: Arc<Mutex<dyn Vtty>>,
    ier: u8,
    lcr: u8,
    mcr: u8,
    divisor_latch: u16,
}

impl Channel {
    fn new(vtty: Arc<Mutex<dyn Vtty>>) -> Self {
        Self {
            vtty,
            ier: 0,
            lcr: 0,
            mcr: 0,
            divisor_latch: 0,
        }
    }

    fn dlab(&self) -> bool {
        self.lcr & LCR_DLAB != 0
    }

    fn lsr(&self) -> u8 {
        let vtty = self.vtty.lock().unwrap();
        let mut v = LSR_TX_EMPTY;
        if vtty.has_input() {
            v |= LSR_RX_READY;
        }
        v
    }

    /// True if this channel currently wants to assert the shared IRQ line:
    /// RX-ready enabled and data waiting, or TX-ready enabled (the UART is
    /// always ready to accept another byte in this model).
    fn wants_irq(&self) -> bool {
        if self.ier & IER_ERXRDY != 0 && self.vtty.lock().unwrap().has_input() {
            return true;
        }
        if self.ier & IER_ETXRDY != 0 {
            return true;
        }
        false
    }
}

/// Two-channel NS16552 bound to a shared IRQ setter/clearer pair.
pub struct Duart {
    channels: [Channel; 2],
    set_irq: Box<dyn Fn() + Send>,
    clear_irq: Box<dyn Fn() + Send>,
    irq_asserted: bool,
}

impl Duart {
    pub fn new(
        console: Arc<Mutex<dyn Vtty>>,
        aux: Arc<Mutex<dyn Vtty>>,
        set_irq: Box<dyn Fn() + Send>,
        clear_irq: Box<dyn Fn() + Send>,
    ) -> Self {
        Self {
            channels: [Channel::new(console), Channel::new(aux)],
            set_irq,
            clear_irq,
            irq_asserted: false,
        }
    }

    /// Re-evaluates whether any channel wants the shared IRQ and updates the
    /// line accordingly. Called after every register access and by the
    /// periodic "dummy IRQ" timer task.
    pub fn recompute_irq(&mut self) {
        let want = self.channels.iter().any(Channel::wants_irq);
        if want && !self.irq_asserted {
            (self.set_irq)();
            self.irq_asserted = true;
        } else if !want && self.irq_asserted {
            (self.clear_irq)();
            self.irq_asserted = false;
        }
    }

    fn channel_and_reg(offset: u64) -> (usize, u64) {
        let per_channel = 8; // generous spacing; only offsets 0..=5 are decoded.
        ((offset / per_channel) as usize % 2, offset % per_channel)
    }

    fn access_channel(&mut self, chan_idx: usize, reg: u64, size: u8, op: AccessOp) -> u64 {
        let dlab = self.channels[chan_idx].dlab();
        let result = match (reg, dlab) {
            (REG_RBR_THR, true) => match op {
                AccessOp::Read => self.channels[chan_idx].divisor_latch as u64 & 0xFF,
                AccessOp::Write(v) => {
                    self.channels[chan_idx].divisor_latch =
                        (self.channels[chan_idx].divisor_latch & 0xFF00) | (v as u16 & 0xFF);
                    0
                }
            },
            (REG_IER, true) => match op {
                AccessOp::Read => (self.channels[chan_idx].divisor_latch >> 8) as u64,
                AccessOp::Write(v) => {
                    self.channels[chan_idx].divisor_latch =
                        (self.channels[chan_idx].divisor_latch & 0x00FF) | ((v as u16 & 0xFF) << 8);
                    0
                }
            },
            (REG_RBR_THR, false) => match op {
                AccessOp::Read => self.channels[chan_idx]
                    .vtty
                    .lock()
                    .unwrap()
                    .read_for_guest()
                    .unwrap_or(0) as u64,
                AccessOp::Write(v) => {
                    self.channels[chan_idx]
                        .vtty
                        .lock()
                        .unwrap()
                        .write_from_guest(v as u8);
                    0
                }
            },
            (REG_IER, false) => match op {
                AccessOp::Read => self.channels[chan_idx].ier as u64,
                AccessOp::Write(v) => {
                    self.channels[chan_idx].ier = v as u8;
                    0
                }
            },
            (REG_IIR, _) => match op {
                AccessOp::Read => 0x01, // "no interrupt pending" placeholder; real cause is per-channel IER/LSR.
                AccessOp::Write(_) => 0,
            },
            (REG_LCR, _) => match op {
                AccessOp::Read => self.channels[chan_idx].lcr as u64,
                AccessOp::Write(v) => {
                    self.channels[chan_idx].lcr = v as u8;
                    0
                }
            },
            (REG_MCR, _) => match op {
                AccessOp::Read => self.channels[chan_idx].mcr as u64,
                AccessOp::Write(v) => {
                    self.channels[chan_idx].mcr = v as u8;
                    0
                }
            },
            (REG_LSR, _) => match op {
                AccessOp::Read => self.channels[chan_idx].lsr() as u64,
                AccessOp::Write(_) => 0,
            },
            _ => {
                tracing::trace!(reg, "duart: unknown register, ignoring");
                0
            }
        };
        let _ = size;
        result
    }
}

impl MmioDevice for Duart {
    fn name(&self) -> &str {
        "ns16552"
    }

    fn access(&mut self, offset: u64, size: u8, op: AccessOp) -> u64 {
        let (chan_idx, reg) = Self::channel_and_reg(offset);
        let value = self.access_channel(chan_idx, reg, size, op);
        self.recompute_irq();
        value
    }
}
