//! Multi-queue timer wheel driving periodic background work (MAC ageing, TX
//! ring scans, watchdog ticks, ...).
//!
//! A [`TimerWheel`] owns a fixed pool of worker threads, each with its own
//! queue of entries ordered by absolute fire time. New timers are assigned to
//! whichever queue currently carries the smallest summed criticity, so a
//! handful of hot, cheap timers don't get stuck behind one expensive queue.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("timer interval must be non-zero")]
    ZeroInterval,
    #[error("no timer with id {0}")]
    NotFound(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

fn wall_now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

fn snap_to_boundary(now: Duration, interval: Duration) -> Duration {
    let now_ns = now.as_nanos();
    let step_ns = interval.as_nanos().max(1);
    let next_ns = (now_ns / step_ns + 1) * step_ns;
    Duration::from_nanos(next_ns.min(u64::MAX as u128) as u64)
}

type Callback = Arc<dyn Fn() + Send + Sync>;

struct TimerEntry {
    interval: Duration,
    fire_time: Duration,
    boundary: bool,
    criticity: u64,
    callback: Callback,
}

#[derive(Default)]
struct QueueState {
    /// Scheduling order: (fire_time, id) -> (). A BTreeMap key gives us the
    /// earliest-due entry in O(log n) without an intrusive linked list.
    entries: BTreeMap<(Duration, u64), ()>,
    timers: HashMap<u64, TimerEntry>,
    running: HashSet<u64>,
    cancel_on_finish: HashSet<u64>,
    total_criticity: u64,
}

struct Queue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

/// A pool of worker threads, each driving one timer queue.
pub struct TimerWheel {
    queues: Vec<Arc<Queue>>,
    next_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerWheel {
    pub fn new(num_queues: usize) -> Self {
        let num_queues = num_queues.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(num_queues);
        let mut threads = Vec::with_capacity(num_queues);
        for idx in 0..num_queues {
            let queue = Arc::new(Queue {
                state: Mutex::new(QueueState::default()),
                wake: Condvar::new(),
            });
            queues.push(queue.clone());
            let shutdown = shutdown.clone();
            let handle = std::thread::Builder::new()
                .name(format!("timer-wheel-{idx}"))
                .spawn(move || worker_loop(queue, shutdown))
                .expect("spawn timer worker");
            threads.push(handle);
        }
        Self {
            queues,
            next_id: AtomicU64::new(0),
            shutdown,
            threads: Mutex::new(threads),
        }
    }

    /// Schedules `callback` to run every `interval`. `boundary` timers snap
    /// their first (and every subsequent) fire to the next wall-clock
    /// multiple of `interval`; non-boundary timers simply accumulate
    /// `interval` on top of the previous fire time, so drift is never reset.
    pub fn add(
        &self,
        interval: Duration,
        boundary: bool,
        criticity: u64,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<TimerId, TimerError> {
        if interval.is_zero() {
            return Err(TimerError::ZeroInterval);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = wall_now();
        let fire_time = if boundary {
            snap_to_boundary(now, interval)
        } else {
            now + interval
        };

        let queue = self.least_loaded_queue();
        {
            let mut st = queue.state.lock().unwrap();
            st.entries.insert((fire_time, id), ());
            st.total_criticity += criticity;
            st.timers.insert(
                id,
                TimerEntry {
                    interval,
                    fire_time,
                    boundary,
                    criticity,
                    callback: Arc::new(callback),
                },
            );
        }
        queue.wake.notify_one();
        tracing::debug!(id, ?interval, boundary, "timer: added");
        Ok(TimerId(id))
    }

    /// Cancels `id`. Safe to call from any thread, including from inside the
    /// timer's own callback: a concurrently running invocation is allowed to
    /// complete, but its reschedule is suppressed.
    pub fn remove(&self, id: TimerId) -> Result<(), TimerError> {
        for queue in &self.queues {
            let mut st = queue.state.lock().unwrap();
            if st.running.contains(&id.0) {
                st.cancel_on_finish.insert(id.0);
                return Ok(());
            }
            if let Some(entry) = st.timers.remove(&id.0) {
                st.entries.remove(&(entry.fire_time, id.0));
                st.total_criticity = st.total_criticity.saturating_sub(entry.criticity);
                return Ok(());
            }
        }
        Err(TimerError::NotFound(id.0))
    }

    fn least_loaded_queue(&self) -> Arc<Queue> {
        self.queues
            .iter()
            .min_by_key(|q| q.state.lock().unwrap().total_criticity)
            .expect("at least one queue")
            .clone()
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for queue in &self.queues {
            queue.wake.notify_all();
        }
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queue: Arc<Queue>, shutdown: Arc<AtomicBool>) {
    loop {
        let mut guard = queue.state.lock().unwrap();
        let due_id = loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            match guard.entries.keys().next().copied() {
                None => {
                    guard = queue.wake.wait(guard).unwrap();
                }
                Some((fire_time, id)) => {
                    let now = wall_now();
                    if fire_time <= now {
                        break id;
                    }
                    let (g, _timeout) = queue.wake.wait_timeout(guard, fire_time - now).unwrap();
                    guard = g;
                }
            }
        };

        let fire_time = guard.timers[&due_id].fire_time;
        guard.entries.remove(&(fire_time, due_id));
        guard.running.insert(due_id);
        let callback = guard.timers[&due_id].callback.clone();
        drop(guard);

        callback();

        let mut guard = queue.state.lock().unwrap();
        guard.running.remove(&due_id);
        let cancelled = guard.cancel_on_finish.remove(&due_id);
        if cancelled {
            if let Some(entry) = guard.timers.remove(&due_id) {
                guard.total_criticity = guard.total_criticity.saturating_sub(entry.criticity);
            }
        } else if let Some(entry) = guard.timers.get_mut(&due_id) {
            let now = wall_now();
            entry.fire_time = if entry.boundary {
                snap_to_boundary(now, entry.interval)
            } else {
                entry.fire_time + entry.interval
            };
            guard.entries.insert((entry.fire_time, due_id), ());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[test]
    fn zero_interval_is_rejected() {
        let wheel = TimerWheel::new(1);
        let err = wheel.add(Duration::ZERO, false, 1, || {}).unwrap_err();
        assert!(matches!(err, TimerError::ZeroInterval));
    }

    #[test]
    fn fires_repeatedly_and_can_be_removed() {
        let wheel = TimerWheel::new(2);
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let id = wheel
            .add(Duration::from_millis(15), false, 1, move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(80));
        wheel.remove(id).unwrap();
        let fired_at_removal = count.load(Ordering::SeqCst);
        assert!(fired_at_removal >= 3, "expected several fires, got {fired_at_removal}");

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), fired_at_removal, "removed timer must not fire again");
    }

    #[test]
    fn non_boundary_timer_does_not_reset_drift() {
        let wheel = TimerWheel::new(1);
        let fires: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let f = fires.clone();
        let id = wheel
            .add(Duration::from_millis(20), false, 1, move || {
                f.lock().unwrap().push(Instant::now());
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(130));
        wheel.remove(id).unwrap();
        let ts = fires.lock().unwrap().clone();
        assert!(ts.len() >= 4);
        for pair in ts.windows(2) {
            let delta = pair[1].duration_since(pair[0]);
            assert!(delta >= Duration::from_millis(15), "delta too small: {delta:?}");
        }
    }

    #[test]
    fn removing_self_from_within_callback_does_not_deadlock() {
        let wheel = Arc::new(TimerWheel::new(1));
        let fired = Arc::new(AtomicU32::new(0));
        let id_slot: Arc<Mutex<Option<TimerId>>> = Arc::new(Mutex::new(None));

        let wheel_for_cb = wheel.clone();
        let fired_cb = fired.clone();
        let id_slot_cb = id_slot.clone();
        let id = wheel
            .add(Duration::from_millis(10), false, 1, move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *id_slot_cb.lock().unwrap() {
                    let _ = wheel_for_cb.remove(id);
                }
            })
            .unwrap();
        *id_slot.lock().unwrap() = Some(id);

        std::thread::sleep(Duration::from_millis(100));
        let after_first = fired.load(Ordering::SeqCst);
        assert_eq!(after_first, 1, "timer must fire exactly once before self-cancelling");
    }

    #[test]
    fn remove_unknown_id_errors() {
        let wheel = TimerWheel::new(1);
        let err = wheel.remove(TimerId(9999)).unwrap_err();
        assert!(matches!(err, TimerError::NotFound(_)));
    }
}
