//! Interrupt routing: the two function pointers every VM carries
//! (`set_irq`/`clear_irq`) plus the idle-preemption table that lets a raised
//! IRQ break the (out-of-scope) CPU collaborator out of an idle sleep.

use std::sync::{Arc, Mutex};

/// Default wiring used when no real CPU collaborator is attached: raised and
/// cleared IRQ numbers are simply recorded so a test harness can inspect
/// them. Platform code substitutes a closure that actually pokes a CPU's
/// interrupt-pending mask.
#[derive(Default)]
pub struct IrqLog {
    pub raised: Vec<u8>,
    pub cleared: Vec<u8>,
}

pub struct InterruptRouter {
    set_irq: Box<dyn Fn(u8) + Send + Sync>,
    clear_irq: Box<dyn Fn(u8) + Send + Sync>,
    idle_preempt: [bool; 256],
}

impl InterruptRouter {
    pub fn new(set_irq: Box<dyn Fn(u8) + Send + Sync>, clear_irq: Box<dyn Fn(u8) + Send + Sync>) -> Self {
        Self {
            set_irq,
            clear_irq,
            idle_preempt: [false; 256],
        }
    }

    /// Default wiring: a log harness tests can read back via the returned
    /// `Arc<Mutex<IrqLog>>`.
    pub fn logging() -> (Self, Arc<Mutex<IrqLog>>) {
        let log = Arc::new(Mutex::new(IrqLog::default()));
        let l1 = log.clone();
        let l2 = log.clone();
        (
            Self::new(
                Box::new(move |irq| l1.lock().unwrap().raised.push(irq)),
                Box::new(move |irq| l2.lock().unwrap().cleared.push(irq)),
            ),
            log,
        )
    }

    pub fn set_irq(&self, irq: u8) {
        (self.set_irq)(irq);
    }

    pub fn clear_irq(&self, irq: u8) {
        (self.clear_irq)(irq);
    }

    pub fn set_idle_preempt(&mut self, irq: u8, preempt: bool) {
        self.idle_preempt[irq as usize] = preempt;
    }

    pub fn idle_preempt(&self, irq: u8) -> bool {
        self.idle_preempt[irq as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_router_records_raised_and_cleared() {
        let (router, log) = InterruptRouter::logging();
        router.set_irq(3);
        router.clear_irq(3);
        let log = log.lock().unwrap();
        assert_eq!(log.raised, vec![3]);
        assert_eq!(log.cleared, vec![3]);
    }

    #[test]
    fn idle_preempt_table_defaults_false() {
        let (router, _log) = InterruptRouter::logging();
        assert!(!router.idle_preempt(7));
    }

    #[test]
    fn idle_preempt_table_is_settable() {
        let (mut router, _log) = InterruptRouter::logging();
        router.set_idle_preempt(7, true);
        assert!(router.idle_preempt(7));
    }
}
