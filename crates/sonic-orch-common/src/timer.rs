//! Timer wheel for a single dispatch loop.
//!
//! Timers are keyed by caller-defined values and kept sorted by deadline.
//! The owner asks for expired keys with [`TimerWheel::expire`] and runs the
//! callbacks itself, inline, under whatever lock guards its state.

use log::trace;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    seq: u64,
    period: Duration,
    repeat: bool,
}

/// Sorted set of armed timers.
#[derive(Debug)]
pub struct TimerWheel<K: Ord + Clone + Debug> {
    queue: BTreeMap<(Instant, u64), K>,
    armed: BTreeMap<K, Armed>,
    seq: u64,
}

impl<K: Ord + Clone + Debug> Default for TimerWheel<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + Debug> TimerWheel<K> {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            armed: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Arms `key` to fire `period` after `now`, replacing any earlier arming.
    pub fn start(&mut self, key: K, period: Duration, repeat: bool, now: Instant) {
        self.stop(&key);
        self.schedule(key, now + period, period, repeat);
    }

    /// Disarms `key`. Returns false if it was not armed.
    pub fn stop(&mut self, key: &K) -> bool {
        match self.armed.remove(key) {
            Some(armed) => {
                self.queue.remove(&(armed.deadline, armed.seq));
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Earliest deadline of any armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every key whose deadline is at or before `now`,
    /// in deadline order. Repeating timers are re-armed one period later
    /// (never earlier than `now + period` after a stall).
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        let mut fired = Vec::new();

        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            let Some(armed) = self.armed.remove(&key) else {
                continue;
            };

            trace!("timer {:?} expired", key);
            if armed.repeat {
                let mut next = armed.deadline + armed.period;
                if next <= now {
                    next = now + armed.period;
                }
                self.schedule(key.clone(), next, armed.period, true);
            }
            fired.push(key);
        }

        fired
    }

    fn schedule(&mut self, key: K, deadline: Instant, period: Duration, repeat: bool) {
        self.seq += 1;
        let seq = self.seq;
        self.queue.insert((deadline, seq), key.clone());
        self.armed.insert(
            key,
            Armed {
                deadline,
                seq,
                period,
                repeat,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_expire_in_deadline_order() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.start("slow", ms(300), false, t0);
        wheel.start("fast", ms(100), false, t0);

        assert_eq!(wheel.next_deadline(), Some(t0 + ms(100)));
        assert!(wheel.expire(t0 + ms(50)).is_empty());
        assert_eq!(wheel.expire(t0 + ms(300)), vec!["fast", "slow"]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn test_repeating_timer_rearms() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.start(1u32, ms(100), true, t0);

        assert_eq!(wheel.expire(t0 + ms(100)), vec![1]);
        assert_eq!(wheel.next_deadline(), Some(t0 + ms(200)));

        // A stall longer than several periods fires once, then resumes.
        assert_eq!(wheel.expire(t0 + ms(1000)), vec![1]);
        assert_eq!(wheel.next_deadline(), Some(t0 + ms(1100)));
        assert!(wheel.is_armed(&1));
    }

    #[test]
    fn test_restart_and_stop() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.start(7u32, ms(100), true, t0);
        wheel.start(7, ms(500), true, t0);
        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.next_deadline(), Some(t0 + ms(500)));

        assert!(wheel.stop(&7));
        assert!(!wheel.stop(&7));
        assert_eq!(wheel.next_deadline(), None);
    }
}
