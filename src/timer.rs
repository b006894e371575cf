use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Millisecond timers. Handles are never reused and a cleared handle is never due.
pub trait TimerHost {
    fn now_ms(&self) -> u64;
    fn set_interval(&mut self, period_ms: u64) -> TimerHandle;
    fn set_timeout(&mut self, delay_ms: u64) -> TimerHandle;
    fn clear(&mut self, handle: TimerHandle);
    fn next_deadline(&self) -> Option<u64>;
    // pops the earliest entry due by until_ms; the clock ends at until_ms once none are left
    fn next_due(&mut self, until_ms: u64) -> Option<TimerHandle>;
}

#[derive(Debug, Clone)]
struct TimerEntry {
    handle: TimerHandle,
    deadline_ms: u64,
    period_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    now_ms: u64,
    next_handle: u64,
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now_ms,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.entries.iter().any(|entry| entry.handle == handle)
    }

    fn push(&mut self, delay_ms: u64, period_ms: Option<u64>) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        self.entries.push(TimerEntry {
            handle,
            deadline_ms: self.now_ms.saturating_add(delay_ms),
            period_ms,
        });
        handle
    }
}

impl TimerHost for TimerQueue {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn set_interval(&mut self, period_ms: u64) -> TimerHandle {
        let period_ms = period_ms.max(1);
        self.push(period_ms, Some(period_ms))
    }

    fn set_timeout(&mut self, delay_ms: u64) -> TimerHandle {
        self.push(delay_ms, None)
    }

    fn clear(&mut self, handle: TimerHandle) {
        self.entries.retain(|entry| entry.handle != handle);
    }

    fn next_deadline(&self) -> Option<u64> {
        self.entries.iter().map(|entry| entry.deadline_ms).min()
    }

    fn next_due(&mut self, until_ms: u64) -> Option<TimerHandle> {
        let due_index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline_ms <= until_ms)
            .min_by_key(|(_, entry)| (entry.deadline_ms, entry.handle))
            .map(|(index, _)| index);

        let Some(index) = due_index else {
            self.now_ms = self.now_ms.max(until_ms);
            return None;
        };

        let entry = &mut self.entries[index];
        let handle = entry.handle;
        self.now_ms = self.now_ms.max(entry.deadline_ms);
        match entry.period_ms {
            Some(period_ms) => entry.deadline_ms = entry.deadline_ms.saturating_add(period_ms),
            None => {
                self.entries.remove(index);
            }
        }
        Some(handle)
    }
}

/// Maps wall-clock time onto a [`TimerHost`] millisecond counter.
pub struct RealtimeClock {
    origin: Instant,
    base_ms: u64,
}

impl RealtimeClock {
    pub fn new(base_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            base_ms,
        }
    }

    pub fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base_ms.saturating_add(elapsed)
    }

    pub fn sleep_until(&self, target_ms: u64) {
        let now = self.now_ms();
        if target_ms > now {
            thread::sleep(Duration::from_millis(target_ms - now));
        }
    }
}
