use std::fmt;

use crate::timer::{TimerHandle, TimerHost};
use crate::vibration::pattern::Pattern;
use crate::vibration::port::VibrationPort;

pub const MIN_REPEAT_COUNT: u32 = 2;
pub const MAX_REPEAT_COUNT: u32 = 10;
pub const MAX_INTERVAL_MS: u64 = 2_000;
pub const INFINITE_TOKEN: &str = "infinite";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RepeatCount {
    Times(u32),
    Infinite,
}

impl RepeatCount {
    /// Accepts `infinite` or an integer in `[MIN_REPEAT_COUNT, MAX_REPEAT_COUNT]`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input == INFINITE_TOKEN {
            return Some(RepeatCount::Infinite);
        }
        let count = input.parse::<u32>().ok()?;
        (MIN_REPEAT_COUNT..=MAX_REPEAT_COUNT)
            .contains(&count)
            .then_some(RepeatCount::Times(count))
    }
}

impl fmt::Display for RepeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatCount::Times(count) => write!(f, "{count}"),
            RepeatCount::Infinite => f.write_str(INFINITE_TOKEN),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RepeatConfig {
    pub enabled: bool,
    pub count: RepeatCount,
    pub interval_ms: u64,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            count: RepeatCount::Times(3),
            interval_ms: 500,
        }
    }
}

impl RepeatConfig {
    pub fn once() -> Self {
        Self::default()
    }

    pub fn repeated(count: RepeatCount, interval_ms: u64) -> Self {
        Self {
            enabled: true,
            count,
            interval_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RepeatStatus {
    pub completed: u32,
    pub target: RepeatCount,
}

impl fmt::Display for RepeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            RepeatCount::Times(target) => write!(f, "{} / {target}", self.completed),
            RepeatCount::Infinite => write!(f, "infinite loop ({})", self.completed),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Running(RepeatCount),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TimerEvent {
    Burst(RepeatStatus),
    Completed(RepeatStatus),
    DeferredRun,
}

struct RepeatSession {
    pattern: Pattern,
    completed: u32,
    target: RepeatCount,
    tick: TimerHandle,
}

impl RepeatSession {
    fn status(&self) -> RepeatStatus {
        RepeatStatus {
            completed: self.completed,
            target: self.target,
        }
    }
}

struct DeferredRun {
    handle: TimerHandle,
    pattern: Pattern,
    config: RepeatConfig,
}

// At most one session; a new run or stop clears the old tick first.
pub struct RepeatScheduler<V, T> {
    port: V,
    timers: T,
    session: Option<RepeatSession>,
    deferred: Option<DeferredRun>,
    last_status: Option<RepeatStatus>,
}

impl<V: VibrationPort, T: TimerHost> RepeatScheduler<V, T> {
    pub fn new(port: V, timers: T) -> Self {
        Self {
            port,
            timers,
            session: None,
            deferred: None,
            last_status: None,
        }
    }

    pub fn execute(&mut self, pattern: &Pattern, config: &RepeatConfig) {
        self.halt_session();

        if !config.enabled {
            tracing::info!(pattern = %pattern, "single burst");
            self.port.vibrate(pattern);
            self.last_status = None;
            return;
        }

        let period_ms = pattern.total_ms().saturating_add(config.interval_ms);
        self.port.vibrate(pattern);
        let tick = self.timers.set_interval(period_ms);
        let session = RepeatSession {
            pattern: pattern.clone(),
            completed: 1,
            target: config.count,
            tick,
        };
        tracing::info!(
            pattern = %pattern,
            target = %config.count,
            period_ms,
            "repeat session started"
        );
        self.last_status = Some(session.status());
        self.session = Some(session);
    }

    /// Runs `execute` once after `delay_ms`, replacing any earlier deferred run.
    pub fn execute_after(&mut self, delay_ms: u64, pattern: &Pattern, config: &RepeatConfig) {
        if let Some(previous) = self.deferred.take() {
            self.timers.clear(previous.handle);
        }
        let handle = self.timers.set_timeout(delay_ms);
        tracing::debug!(delay_ms, pattern = %pattern, "deferred run scheduled");
        self.deferred = Some(DeferredRun {
            handle,
            pattern: pattern.clone(),
            config: *config,
        });
    }

    pub fn stop(&mut self) {
        self.halt_session();
        if let Some(deferred) = self.deferred.take() {
            self.timers.clear(deferred.handle);
        }
        self.last_status = None;
        self.port.cancel();
        tracing::info!("vibration stopped");
    }

    pub fn on_timer(&mut self, handle: TimerHandle) -> Option<TimerEvent> {
        if self
            .deferred
            .as_ref()
            .is_some_and(|deferred| deferred.handle == handle)
        {
            let deferred = self.deferred.take()?;
            self.execute(&deferred.pattern, &deferred.config);
            return Some(TimerEvent::DeferredRun);
        }

        let session = self.session.as_mut().filter(|session| session.tick == handle)?;
        if let RepeatCount::Times(target) = session.target
            && session.completed >= target
        {
            let status = session.status();
            self.halt_session();
            tracing::info!(completed = status.completed, "repeat session finished");
            return Some(TimerEvent::Completed(status));
        }

        self.port.vibrate(&session.pattern);
        session.completed = session.completed.saturating_add(1);
        let status = session.status();
        tracing::debug!(status = %status, "repeat burst");
        self.last_status = Some(status);
        Some(TimerEvent::Burst(status))
    }

    pub fn advance_to(&mut self, until_ms: u64) -> Vec<TimerEvent> {
        let mut events = Vec::new();
        while let Some(handle) = self.timers.next_due(until_ms) {
            if let Some(event) = self.on_timer(handle) {
                events.push(event);
            }
        }
        events
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => SessionState::Running(session.target),
            None => SessionState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    #[cfg(test)]
    pub fn has_deferred_run(&self) -> bool {
        self.deferred.is_some()
    }

    pub fn status(&self) -> Option<RepeatStatus> {
        self.last_status
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn now_ms(&self) -> u64 {
        self.timers.now_ms()
    }

    #[cfg(test)]
    pub fn timers(&self) -> &T {
        &self.timers
    }

    fn halt_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.timers.clear(session.tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerQueue;
    use crate::vibration::port::testing::{PortCall, RecordingPort};

    fn scheduler() -> (RepeatScheduler<RecordingPort, TimerQueue>, RecordingPort) {
        let port = RecordingPort::default();
        (RepeatScheduler::new(port.clone(), TimerQueue::new()), port)
    }

    fn pattern(text: &str) -> Pattern {
        Pattern::parse(text).expect("valid pattern")
    }

    #[test]
    fn disabled_repeat_fires_once_and_stays_idle() {
        let (mut scheduler, port) = scheduler();
        let burst = pattern("100,50,100");
        scheduler.execute(&burst, &RepeatConfig::once());

        assert_eq!(port.calls(), vec![PortCall::Vibrate(burst)]);
        assert_eq!(scheduler.state(), SessionState::Idle);
        assert!(scheduler.advance_to(10_000).is_empty());
        assert_eq!(port.vibrations(), 1);
    }

    #[test]
    fn counted_repeat_fires_exactly_n_bursts_spaced_by_period() {
        let (mut scheduler, port) = scheduler();
        let burst = pattern("100,50,100");
        scheduler.execute(&burst, &RepeatConfig::repeated(RepeatCount::Times(3), 100));
        assert_eq!(port.vibrations(), 1);
        assert_eq!(
            scheduler.status(),
            Some(RepeatStatus {
                completed: 1,
                target: RepeatCount::Times(3)
            })
        );

        scheduler.advance_to(349);
        assert_eq!(port.vibrations(), 1);
        scheduler.advance_to(350);
        assert_eq!(port.vibrations(), 2);
        scheduler.advance_to(699);
        assert_eq!(port.vibrations(), 2);
        let events = scheduler.advance_to(700);
        assert_eq!(port.vibrations(), 3);
        assert_eq!(
            events,
            vec![TimerEvent::Burst(RepeatStatus {
                completed: 3,
                target: RepeatCount::Times(3)
            })]
        );

        let events = scheduler.advance_to(10_000);
        assert_eq!(port.vibrations(), 3);
        assert!(matches!(events.as_slice(), [TimerEvent::Completed(_)]));
        assert_eq!(scheduler.state(), SessionState::Idle);
        assert_eq!(scheduler.timers().pending(), 0);
        assert_eq!(scheduler.status().map(|status| status.completed), Some(3));
    }

    #[test]
    fn infinite_repeat_stops_only_on_stop() {
        let (mut scheduler, port) = scheduler();
        scheduler.execute(
            &pattern("200"),
            &RepeatConfig::repeated(RepeatCount::Infinite, 0),
        );
        scheduler.advance_to(2_000);
        assert_eq!(port.vibrations(), 11);
        assert_eq!(
            scheduler.state(),
            SessionState::Running(RepeatCount::Infinite)
        );
        assert_eq!(
            scheduler.status().map(|status| status.to_string()),
            Some("infinite loop (11)".to_string())
        );

        scheduler.stop();
        assert_eq!(port.calls().last(), Some(&PortCall::Cancel));
        scheduler.advance_to(100_000);
        assert_eq!(port.vibrations(), 11);
        assert_eq!(scheduler.status(), None);
    }

    #[test]
    fn new_execute_supersedes_running_session() {
        let (mut scheduler, port) = scheduler();
        scheduler.execute(
            &pattern("100"),
            &RepeatConfig::repeated(RepeatCount::Infinite, 100),
        );
        scheduler.execute(
            &pattern("300"),
            &RepeatConfig::repeated(RepeatCount::Times(2), 0),
        );
        assert_eq!(scheduler.timers().pending(), 1);

        scheduler.advance_to(5_000);
        let calls = port.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], PortCall::Vibrate(pattern("100")));
        assert_eq!(calls[1], PortCall::Vibrate(pattern("300")));
        assert_eq!(calls[2], PortCall::Vibrate(pattern("300")));
    }

    #[test]
    fn single_burst_cancels_running_session() {
        let (mut scheduler, port) = scheduler();
        scheduler.execute(
            &pattern("100"),
            &RepeatConfig::repeated(RepeatCount::Infinite, 0),
        );
        scheduler.execute(&pattern("50"), &RepeatConfig::once());
        scheduler.advance_to(1_000);
        assert_eq!(port.vibrations(), 2);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn deferred_run_fires_once_after_delay() {
        let (mut scheduler, port) = scheduler();
        scheduler.execute_after(500, &pattern("100"), &RepeatConfig::once());
        assert!(scheduler.has_deferred_run());

        scheduler.advance_to(499);
        assert_eq!(port.vibrations(), 0);
        let events = scheduler.advance_to(501);
        assert_eq!(events, vec![TimerEvent::DeferredRun]);
        assert_eq!(port.vibrations(), 1);
        scheduler.advance_to(5_000);
        assert_eq!(port.vibrations(), 1);
    }

    #[test]
    fn deferred_run_can_start_a_repeat_session() {
        let (mut scheduler, port) = scheduler();
        scheduler.execute_after(
            500,
            &pattern("100"),
            &RepeatConfig::repeated(RepeatCount::Times(2), 100),
        );
        scheduler.advance_to(500);
        assert!(scheduler.is_running());
        scheduler.advance_to(700);
        assert_eq!(port.vibrations(), 2);
        scheduler.advance_to(900);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn stop_cancels_pending_deferred_run() {
        let (mut scheduler, port) = scheduler();
        scheduler.execute_after(500, &pattern("100"), &RepeatConfig::once());
        scheduler.stop();
        scheduler.advance_to(5_000);
        assert_eq!(port.calls(), vec![PortCall::Cancel]);
        assert!(!scheduler.has_deferred_run());
    }

    #[test]
    fn stop_when_idle_still_cancels_vibration() {
        let (mut scheduler, port) = scheduler();
        scheduler.stop();
        scheduler.stop();
        assert_eq!(port.calls(), vec![PortCall::Cancel, PortCall::Cancel]);
    }

    #[test]
    fn repeat_count_parsing_enforces_range() {
        assert_eq!(RepeatCount::parse("infinite"), Some(RepeatCount::Infinite));
        assert_eq!(RepeatCount::parse("2"), Some(RepeatCount::Times(2)));
        assert_eq!(RepeatCount::parse("10"), Some(RepeatCount::Times(10)));
        assert_eq!(RepeatCount::parse("1"), None);
        assert_eq!(RepeatCount::parse("11"), None);
        assert_eq!(RepeatCount::parse("many"), None);
        assert_eq!(RepeatCount::Times(4).to_string(), "4");
    }
}
