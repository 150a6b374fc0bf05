//! Packet filter chain: a small, named pipeline a NIO's frames pass through
//! before delivery (RX) or before hitting the transport (TX).
//!
//! Three independent slots exist — `rx`, `tx`, and `both` — mirroring the
//! historical split between "apply only on the way in", "only on the way
//! out", and "either direction". `both` runs after the direction-specific
//! slot.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Pass,
    Drop,
}

pub trait PacketFilter: Send {
    fn name(&self) -> &str;
    fn apply(&mut self, frame: &[u8]) -> FilterAction;
}

#[derive(Default)]
struct Slots {
    rx: Option<Box<dyn PacketFilter>>,
    tx: Option<Box<dyn PacketFilter>>,
    both: Option<Box<dyn PacketFilter>>,
}

/// Thread-safe holder for a NIO's three filter slots.
#[derive(Default)]
pub struct FilterChain {
    slots: Mutex<Slots>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSlot {
    Rx,
    Tx,
    Both,
}

impl FilterChain {
    pub fn set(&self, slot: FilterSlot, filter: Box<dyn PacketFilter>) {
        let mut slots = self.slots.lock().unwrap();
        match slot {
            FilterSlot::Rx => slots.rx = Some(filter),
            FilterSlot::Tx => slots.tx = Some(filter),
            FilterSlot::Both => slots.both = Some(filter),
        }
    }

    pub fn clear(&self, slot: FilterSlot) {
        let mut slots = self.slots.lock().unwrap();
        match slot {
            FilterSlot::Rx => slots.rx = None,
            FilterSlot::Tx => slots.tx = None,
            FilterSlot::Both => slots.both = None,
        }
    }

    /// Runs the ingress chain: `rx` then `both`. Returns `Drop` as soon as
    /// either stage drops the frame.
    pub fn run_ingress(&self, frame: &[u8]) -> FilterAction {
        let mut slots = self.slots.lock().unwrap();
        if let Some(f) = slots.rx.as_mut() {
            if f.apply(frame) == FilterAction::Drop {
                return FilterAction::Drop;
            }
        }
        if let Some(f) = slots.both.as_mut() {
            if f.apply(frame) == FilterAction::Drop {
                return FilterAction::Drop;
            }
        }
        FilterAction::Pass
    }

    /// Runs the egress chain: `tx` then `both`.
    pub fn run_egress(&self, frame: &[u8]) -> FilterAction {
        let mut slots = self.slots.lock().unwrap();
        if let Some(f) = slots.tx.as_mut() {
            if f.apply(frame) == FilterAction::Drop {
                return FilterAction::Drop;
            }
        }
        if let Some(f) = slots.both.as_mut() {
            if f.apply(frame) == FilterAction::Drop {
                return FilterAction::Drop;
            }
        }
        FilterAction::Pass
    }
}

/// Drops every Nth frame it sees (N = `frequency`, minimum 1). Useful for
/// simulating lossy links in test harnesses.
pub struct FrequencyDropFilter {
    name: String,
    frequency: u64,
    seen: u64,
}

impl FrequencyDropFilter {
    pub fn new(frequency: u64) -> Self {
        Self {
            name: "frequency-drop".to_string(),
            frequency: frequency.max(1),
            seen: 0,
        }
    }
}

impl PacketFilter for FrequencyDropFilter {
    fn name(&self) -> &str {
        &self.name
    }
    fn apply(&mut self, _frame: &[u8]) -> FilterAction {
        self.seen += 1;
        if self.seen % self.frequency == 0 {
            FilterAction::Drop
        } else {
            FilterAction::Pass
        }
    }
}

/// Appends every frame it sees to an in-memory capture buffer, in classic
/// pcap record order (newest last). Always passes the frame through
/// unchanged.
pub struct CaptureFilter {
    name: String,
    captured: Mutex<Vec<Vec<u8>>>,
    limit: usize,
}

impl CaptureFilter {
    pub fn new(limit: usize) -> Self {
        Self {
            name: "capture".to_string(),
            captured: Mutex::new(Vec::new()),
            limit,
        }
    }

    pub fn drain(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.captured.lock().unwrap())
    }
}

impl PacketFilter for CaptureFilter {
    fn name(&self) -> &str {
        &self.name
    }
    fn apply(&mut self, frame: &[u8]) -> FilterAction {
        let mut captured = self.captured.lock().unwrap();
        if captured.len() < self.limit {
            captured.push(frame.to_vec());
        }
        FilterAction::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_drop_drops_every_nth() {
        let mut f = FrequencyDropFilter::new(3);
        let frame = [0u8; 4];
        let results: Vec<_> = (0..6).map(|_| f.apply(&frame)).collect();
        assert_eq!(
            results,
            vec![
                FilterAction::Pass,
                FilterAction::Pass,
                FilterAction::Drop,
                FilterAction::Pass,
                FilterAction::Pass,
                FilterAction::Drop,
            ]
        );
    }

    #[test]
    fn egress_runs_tx_then_both_and_short_circuits() {
        let chain = FilterChain::default();
        chain.set(FilterSlot::Tx, Box::new(FrequencyDropFilter::new(1)));
        // tx drops everything; both (a capture filter) must never see a frame.
        let capture = CaptureFilter::new(10);
        chain.set(FilterSlot::Both, Box::new(capture));
        let action = chain.run_egress(&[1, 2, 3]);
        assert_eq!(action, FilterAction::Drop);
    }

    #[test]
    fn capture_filter_records_frames_and_always_passes() {
        let mut f = CaptureFilter::new(2);
        assert_eq!(f.apply(&[1]), FilterAction::Pass);
        assert_eq!(f.apply(&[2]), FilterAction::Pass);
        assert_eq!(f.apply(&[3]), FilterAction::Pass);
        assert_eq!(f.drain(), vec![vec![1], vec![2]]);
    }
}
