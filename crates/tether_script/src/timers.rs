//! Timer scheduling for `setTimeout` / `setInterval`
//!
//! Timers are pumped once per tick against the engine clock. Callbacks run
//! outside the scheduler lock, so a callback may schedule or cancel timers,
//! including itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tether_core::sync::lock;

use crate::callbacks::CallbackId;

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        // Process-wide so ids never repeat across engine restarts.
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TimerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        TimerId(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct TimerEntry {
    id: TimerId,
    callback: CallbackId,
    trigger: Duration,
    /// `None` for one-shot timers.
    interval: Option<Duration>,
    /// Cleared by the script.
    cancelled: bool,
    /// One-shot already taken by a pump; swept once it stops firing.
    consumed: bool,
    firing: bool,
}

impl TimerEntry {
    fn is_live(&self) -> bool {
        !self.cancelled && !self.consumed
    }
}

/// Outcome of one [`TimerScheduler::pump`].
#[derive(Debug, Default)]
pub struct TimerPump {
    pub fired: usize,
    /// Callbacks of entries swept after this pump; release them.
    pub released: Vec<CallbackId>,
}

/// Schedules timer callbacks
pub struct TimerScheduler {
    entries: Mutex<Vec<TimerEntry>>,
    min_interval: Duration,
}

fn delay_from_ms(ms: f64) -> Duration {
    if ms.is_nan() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
}

impl TimerScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            min_interval,
        }
    }

    /// Schedule `callback` to run `delay_ms` after `now`. Negative or NaN
    /// delays count as zero; repeating timers never run more often than the
    /// configured floor.
    pub fn schedule(&self, callback: CallbackId, now: Duration, delay_ms: f64, repeating: bool) -> TimerId {
        let mut delay = delay_from_ms(delay_ms);
        let interval = repeating.then(|| {
            delay = delay.max(self.min_interval);
            delay
        });

        let id = TimerId::next();
        lock(&self.entries).push(TimerEntry {
            id,
            callback,
            trigger: now.saturating_add(delay),
            interval,
            cancelled: false,
            consumed: false,
            firing: false,
        });
        id
    }

    /// Cancel a timer that can still fire. A due timer cancelled by an
    /// earlier callback of the same pump does not fire.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut entries = lock(&self.entries);
        match entries.iter_mut().find(|entry| entry.id == id && !entry.cancelled) {
            Some(entry) => {
                entry.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// Fire every due timer through `fire`, then sweep cancelled and spent entries.
    pub fn pump(&self, now: Duration, mut fire: impl FnMut(TimerId, CallbackId)) -> TimerPump {
        let mut due: Vec<(Duration, TimerId, CallbackId)> = {
            let mut entries = lock(&self.entries);
            let mut due = Vec::new();
            for entry in entries.iter_mut() {
                if !entry.is_live() || entry.firing || entry.trigger > now {
                    continue;
                }
                due.push((entry.trigger, entry.id, entry.callback));
                entry.firing = true;
                match entry.interval {
                    Some(interval) => {
                        entry.trigger = entry.trigger.saturating_add(interval);
                        if entry.trigger <= now {
                            // Fell behind; skip the missed periods.
                            entry.trigger = now.saturating_add(interval);
                        }
                    }
                    None => entry.consumed = true,
                }
            }
            due
        };
        due.sort();

        let mut fired = 0;
        for (_, id, callback) in &due {
            let cancelled = lock(&self.entries)
                .iter()
                .find(|entry| entry.id == *id)
                .map_or(true, |entry| entry.cancelled);
            if !cancelled {
                fire(*id, *callback);
                fired += 1;
            }
            if let Some(entry) = lock(&self.entries).iter_mut().find(|entry| entry.id == *id) {
                entry.firing = false;
            }
        }

        let mut entries = lock(&self.entries);
        let mut released = Vec::new();
        entries.retain(|entry| {
            let sweep = !entry.is_live() && !entry.firing;
            if sweep {
                released.push(entry.callback);
            }
            !sweep
        });

        TimerPump {
            fired,
            released,
        }
    }

    /// Timers that will still fire.
    pub fn active(&self) -> usize {
        lock(&self.entries).iter().filter(|entry| entry.is_live()).count()
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        lock(&self.entries)
            .iter()
            .any(|entry| entry.id == id && entry.is_live())
    }

    /// Remove every entry, returning the callbacks to release.
    pub fn take_all(&self) -> Vec<CallbackId> {
        lock(&self.entries)
            .drain(..)
            .map(|entry| entry.callback)
            .collect()
    }
}

impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn ids(n: u64) -> Vec<CallbackId> {
        (1..=n).map(CallbackId::from_raw).collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_one_shot_fires_once_after_delay() {
        let scheduler = TimerScheduler::default();
        let cb = ids(1)[0];
        let id = scheduler.schedule(cb, ms(0), 100.0, false);

        assert_eq!(scheduler.pump(ms(99), |_, _| panic!("early")).fired, 0);
        let mut seen = Vec::new();
        let pump = scheduler.pump(ms(100), |id, cb| seen.push((id, cb)));

        assert_eq!(seen, vec![(id, cb)]);
        assert_eq!(pump.released, vec![cb]);
        assert!(!scheduler.is_active(id));
        assert_eq!(scheduler.active(), 0);
        assert_eq!(scheduler.pump(ms(1_000), |_, _| panic!("twice")).fired, 0);
    }

    #[test]
    fn test_repeating_fires_each_interval_until_cancelled() {
        let scheduler = TimerScheduler::default();
        let cb = ids(1)[0];
        let id = scheduler.schedule(cb, ms(0), 50.0, true);

        let mut fired = 0;
        for step in 1..=4 {
            fired += scheduler.pump(ms(step * 50), |_, _| {}).fired;
        }
        assert_eq!(fired, 4);

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        let pump = scheduler.pump(ms(250), |_, _| panic!("cancelled"));
        assert_eq!(pump.released, vec![cb]);
    }

    #[test]
    fn test_cancel_before_fire() {
        let scheduler = TimerScheduler::default();
        let id = scheduler.schedule(ids(1)[0], ms(0), 10.0, false);
        assert!(scheduler.cancel(id));
        assert_eq!(scheduler.pump(ms(100), |_, _| panic!("cancelled")).fired, 0);
    }

    #[test]
    fn test_cancel_from_inside_own_callback() {
        let scheduler = TimerScheduler::default();
        let cb = ids(1)[0];
        let id = scheduler.schedule(cb, ms(0), 10.0, true);
        let calls = RefCell::new(0);

        let pump = scheduler.pump(ms(10), |fired, _| {
            *calls.borrow_mut() += 1;
            assert!(scheduler.cancel(fired));
            // Re-entrant pump must not fire the entry again.
            assert_eq!(scheduler.pump(ms(10_000), |_, _| panic!("re-entered")).fired, 0);
        });

        assert_eq!(*calls.borrow(), 1);
        assert_eq!(pump.released, vec![cb]);
        assert!(!scheduler.is_active(id));
    }

    #[test]
    fn test_cancel_by_earlier_callback_in_same_pump() {
        let scheduler = TimerScheduler::default();
        let [a, b, c]: [CallbackId; 3] = ids(3).try_into().unwrap();
        scheduler.schedule(a, ms(0), 10.0, false);
        let one_shot = scheduler.schedule(b, ms(0), 10.0, false);
        let repeating = scheduler.schedule(c, ms(0), 10.0, true);

        let mut seen = Vec::new();
        let pump = scheduler.pump(ms(10), |_, cb| {
            seen.push(cb);
            if cb == a {
                assert!(scheduler.cancel(one_shot));
                assert!(scheduler.cancel(repeating));
            }
        });

        assert_eq!(seen, vec![a]);
        assert_eq!(pump.fired, 1);
        let mut released = pump.released;
        released.sort();
        assert_eq!(released, vec![a, b, c]);
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn test_negative_delay_and_interval_floor() {
        let scheduler = TimerScheduler::new(ms(5));
        let [a, b]: [CallbackId; 2] = ids(2).try_into().unwrap();
        scheduler.schedule(a, ms(0), -20.0, false);
        scheduler.schedule(b, ms(0), 0.0, true);

        assert_eq!(scheduler.pump(ms(0), |_, _| {}).fired, 1);
        assert_eq!(scheduler.pump(ms(4), |_, _| {}).fired, 0);
        assert_eq!(scheduler.pump(ms(5), |_, _| {}).fired, 1);
    }

    #[test]
    fn test_due_timers_fire_in_trigger_order() {
        let scheduler = TimerScheduler::default();
        let [a, b, c]: [CallbackId; 3] = ids(3).try_into().unwrap();
        scheduler.schedule(a, ms(0), 30.0, false);
        scheduler.schedule(b, ms(0), 10.0, false);
        scheduler.schedule(c, ms(0), 20.0, false);

        let mut order = Vec::new();
        scheduler.pump(ms(30), |_, cb| order.push(cb));
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let scheduler = TimerScheduler::default();
        let cb = ids(1)[0];
        let first = scheduler.schedule(cb, ms(0), 1.0, false);
        let second = scheduler.schedule(cb, ms(0), 1.0, false);
        assert!(second > first);
    }
}
