use thiserror::Error;

use crate::config::Settings;
use crate::share::{self, AutoSource, DecodedShare, ShareDefaults, ShareState};
use crate::timer::{RealtimeClock, TimerHost};
use crate::vibration::pattern::{ParseError, Pattern, Preset};
use crate::vibration::port::{Capability, VibrationPort};
use crate::vibration::scheduler::{
    RepeatConfig, RepeatScheduler, RepeatStatus, SessionState, TimerEvent,
};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    Unsupported(String),
    #[error("invalid pattern: {0}")]
    Parse(#[from] ParseError),
}

/// Which controls a hydrated link changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrateOutcome {
    pub pattern_text: bool,
    pub duration: bool,
    pub repeat: bool,
    pub auto_scheduled: bool,
}

/// Owns the application state behind the controls: the probed capability, the
/// current inputs and the single repeat scheduler.
pub struct Controller<V, T> {
    capability: Capability,
    settings: Settings,
    pattern_text: String,
    duration_ms: u64,
    repeat: RepeatConfig,
    scheduler: RepeatScheduler<V, T>,
}

impl<V: VibrationPort, T: TimerHost> Controller<V, T> {
    pub fn new(capability: Capability, settings: Settings, port: V, timers: T) -> Self {
        if let Capability::Unavailable { reason } = &capability {
            tracing::warn!(reason = %reason, "vibration unavailable; controls disabled");
        }
        Self {
            capability,
            pattern_text: settings.default_pattern.clone(),
            duration_ms: settings.default_duration_ms,
            repeat: RepeatConfig::default(),
            settings,
            scheduler: RepeatScheduler::new(port, timers),
        }
    }

    pub fn controls_enabled(&self) -> bool {
        self.capability.is_available()
    }

    pub fn status_message(&self) -> String {
        self.capability.status_message()
    }

    pub fn pattern_text(&self) -> &str {
        &self.pattern_text
    }

    pub fn set_pattern_text(&mut self, text: impl Into<String>) {
        self.pattern_text = text.into();
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn set_duration_ms(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }

    pub fn repeat(&self) -> RepeatConfig {
        self.repeat
    }

    /// Disabling repeat also ends any running session.
    pub fn set_repeat(&mut self, repeat: RepeatConfig) {
        if self.repeat.enabled && !repeat.enabled && self.scheduler.is_running() {
            self.scheduler.stop();
        }
        self.repeat = repeat;
    }

    pub fn play_preset(&mut self, preset: Preset) -> Result<Pattern, ControlError> {
        self.play(preset.pattern())
    }

    pub fn play_pattern_text(&mut self) -> Result<Pattern, ControlError> {
        let pattern = Pattern::parse(&self.pattern_text)?;
        self.play(pattern)
    }

    pub fn play_duration(&mut self) -> Result<Pattern, ControlError> {
        self.play(Pattern::single(self.duration_ms))
    }

    pub fn play(&mut self, pattern: Pattern) -> Result<Pattern, ControlError> {
        self.ensure_enabled()?;
        self.scheduler.execute(&pattern, &self.repeat);
        Ok(pattern)
    }

    pub fn stop(&mut self) -> Result<(), ControlError> {
        self.ensure_enabled()?;
        self.scheduler.stop();
        Ok(())
    }

    /// Applies a share link to the inputs and schedules its auto-run, if requested.
    pub fn hydrate(&mut self, query: &str) -> HydrateOutcome {
        let decoded = share::decode(query);
        let mut outcome = HydrateOutcome::default();

        if let Some(text) = &decoded.pattern_text {
            self.pattern_text = text.clone();
            outcome.pattern_text = true;
        }
        if let Some(duration_ms) = decoded.duration_ms {
            self.duration_ms = duration_ms;
            outcome.duration = true;
        }
        if decoded.repeat_enabled {
            self.repeat.enabled = true;
            if let Some(count) = decoded.repeat_count {
                self.repeat.count = count;
            }
            if let Some(interval_ms) = decoded.interval_ms {
                self.repeat.interval_ms = interval_ms;
            }
            outcome.repeat = true;
        }

        outcome.auto_scheduled = self.schedule_auto_run(&decoded);
        tracing::info!(?outcome, "share link applied");
        outcome
    }

    fn schedule_auto_run(&mut self, decoded: &DecodedShare) -> bool {
        let Some(source) = decoded.auto_source() else {
            return false;
        };
        if !self.controls_enabled() {
            tracing::warn!("auto-run requested but vibration is unavailable");
            return false;
        }
        let pattern = match source {
            AutoSource::Preset => decoded.preset.map(Preset::pattern),
            AutoSource::Pattern => Pattern::parse(&self.pattern_text).ok(),
            AutoSource::Duration => Some(Pattern::single(self.duration_ms)),
        };
        let Some(pattern) = pattern else {
            tracing::warn!(?source, "auto-run skipped; linked pattern is not playable");
            return false;
        };
        self.scheduler
            .execute_after(self.settings.auto_delay_ms, &pattern, &self.repeat);
        true
    }

    pub fn share_state(&self) -> ShareState {
        ShareState {
            pattern_text: self.pattern_text.clone(),
            duration_ms: self.duration_ms,
            repeat: self.repeat,
        }
    }

    pub fn share_query(&self) -> String {
        let defaults = ShareDefaults {
            pattern_text: self.settings.default_pattern.clone(),
            duration_ms: self.settings.default_duration_ms,
        };
        share::encode(&self.share_state(), &defaults)
    }

    pub fn share_url(&self, base_url: &str) -> String {
        share::share_url(base_url, &self.share_query())
    }

    pub fn session_state(&self) -> SessionState {
        self.scheduler.state()
    }

    pub fn repeat_status(&self) -> Option<RepeatStatus> {
        self.scheduler.status()
    }

    #[cfg(test)]
    pub fn has_pending_work(&self) -> bool {
        self.scheduler.next_deadline().is_some()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    pub fn advance_to(&mut self, until_ms: u64) -> Vec<TimerEvent> {
        self.scheduler.advance_to(until_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    /// Sleeps between timer deadlines until nothing is pending or `limit_ms` of wall time
    /// has passed. Returns `true` when the limit cut the run short.
    pub fn run_realtime(
        &mut self,
        limit_ms: Option<u64>,
        mut on_event: impl FnMut(&TimerEvent),
    ) -> bool {
        let clock = RealtimeClock::new(self.now_ms());
        let stop_at = limit_ms.map(|limit| clock.now_ms().saturating_add(limit));

        while let Some(deadline) = self.scheduler.next_deadline() {
            if let Some(stop_at) = stop_at
                && deadline > stop_at
            {
                clock.sleep_until(stop_at);
                self.advance_to(stop_at);
                return true;
            }
            clock.sleep_until(deadline);
            for event in self.advance_to(clock.now_ms()) {
                on_event(&event);
            }
        }
        false
    }

    fn ensure_enabled(&self) -> Result<(), ControlError> {
        if self.controls_enabled() {
            Ok(())
        } else {
            Err(ControlError::Unsupported(self.status_message()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerQueue;
    use crate::vibration::port::testing::{PortCall, RecordingPort};
    use crate::vibration::scheduler::RepeatCount;

    fn controller() -> (Controller<RecordingPort, TimerQueue>, RecordingPort) {
        let port = RecordingPort::default();
        (
            Controller::new(
                Capability::Available,
                Settings::default(),
                port.clone(),
                TimerQueue::new(),
            ),
            port,
        )
    }

    #[test]
    fn plays_pattern_text_once_by_default() {
        let (mut controller, port) = controller();
        controller.set_pattern_text("100,50,100");
        let pattern = controller.play_pattern_text().expect("play");
        assert_eq!(pattern.total_ms(), 250);
        assert_eq!(pattern.segments().len(), 3);
        assert_eq!(port.calls(), vec![PortCall::Vibrate(pattern)]);
        assert_eq!(controller.session_state(), SessionState::Idle);
    }

    #[test]
    fn invalid_text_is_not_executed() {
        let (mut controller, port) = controller();
        controller.set_pattern_text("100,abc");
        let err = controller.play_pattern_text().expect_err("invalid");
        assert!(matches!(err, ControlError::Parse(_)));
        assert!(port.calls().is_empty());
    }

    #[test]
    fn unavailable_capability_disables_controls() {
        let port = RecordingPort::default();
        let mut controller = Controller::new(
            Capability::Unavailable {
                reason: "no motor".to_string(),
            },
            Settings::default(),
            port.clone(),
            TimerQueue::new(),
        );
        assert!(!controller.controls_enabled());
        let err = controller.play_preset(Preset::Short).expect_err("disabled");
        assert!(err.to_string().contains("no motor"));
        assert!(controller.stop().is_err());
        assert!(!controller.hydrate("preset=short&auto=1").auto_scheduled);
        assert!(port.calls().is_empty());
    }

    #[test]
    fn turning_repeat_off_stops_the_session() {
        let (mut controller, port) = controller();
        controller.set_repeat(RepeatConfig::repeated(RepeatCount::Infinite, 0));
        controller.play_duration().expect("play");
        assert!(matches!(
            controller.session_state(),
            SessionState::Running(RepeatCount::Infinite)
        ));
        controller.set_repeat(RepeatConfig::once());
        assert_eq!(controller.session_state(), SessionState::Idle);
        assert_eq!(port.calls().last(), Some(&PortCall::Cancel));
    }

    #[test]
    fn hydrate_applies_values_and_defers_auto_run() {
        let (mut controller, port) = controller();
        let outcome =
            controller.hydrate("pattern=300,100&enabled=1&repeat=2&interval=100&auto=1");
        assert_eq!(
            outcome,
            HydrateOutcome {
                pattern_text: true,
                duration: false,
                repeat: true,
                auto_scheduled: true,
            }
        );
        assert_eq!(controller.pattern_text(), "300,100");
        assert_eq!(
            controller.repeat(),
            RepeatConfig::repeated(RepeatCount::Times(2), 100)
        );

        controller.advance_to(499);
        assert!(port.calls().is_empty());
        controller.advance_to(500);
        assert_eq!(port.vibrations(), 1);
        controller.advance_to(10_000);
        assert_eq!(port.vibrations(), 2);
        assert!(!controller.has_pending_work());
    }

    #[test]
    fn hydrate_ignores_invalid_values() {
        let (mut controller, _) = controller();
        let outcome = controller.hydrate("duration=9999&enabled=1&repeat=50&interval=-1");
        assert!(!outcome.duration);
        assert_eq!(controller.duration_ms(), 200);
        assert!(controller.repeat().enabled);
        assert_eq!(controller.repeat().count, RepeatConfig::default().count);
        assert_eq!(
            controller.repeat().interval_ms,
            RepeatConfig::default().interval_ms
        );
    }

    #[test]
    fn auto_run_with_duration_uses_current_duration() {
        let (mut controller, port) = controller();
        controller.hydrate("duration=20&auto=1");
        controller.advance_to(1_000);
        assert_eq!(port.calls(), vec![PortCall::Vibrate(Pattern::single(20))]);
    }

    #[test]
    fn auto_run_skips_unplayable_pattern() {
        let (mut controller, port) = controller();
        let outcome = controller.hydrate("pattern=1,x&auto=1");
        assert!(outcome.pattern_text);
        assert!(!outcome.auto_scheduled);
        controller.advance_to(1_000);
        assert!(port.calls().is_empty());
    }

    #[test]
    fn share_query_round_trips_through_hydrate() {
        let (mut source, _) = controller();
        source.set_pattern_text("250,100,250");
        source.set_repeat(RepeatConfig::repeated(RepeatCount::Times(5), 700));
        let url = source.share_url("https://x.test/");
        assert!(url.starts_with("https://x.test/?pattern="));

        let (mut target, _) = controller();
        target.hydrate(&url);
        assert_eq!(target.pattern_text(), "250,100,250");
        assert_eq!(target.repeat(), source.repeat());
    }

    #[test]
    fn realtime_run_drains_counted_session() {
        let (mut controller, port) = controller();
        controller.set_pattern_text("5,5");
        controller.set_repeat(RepeatConfig::repeated(RepeatCount::Times(3), 0));
        controller.play_pattern_text().expect("play");

        let mut bursts = 0;
        let cut_short = controller.run_realtime(Some(5_000), |event| {
            if matches!(event, TimerEvent::Burst(_)) {
                bursts += 1;
            }
        });
        assert!(!cut_short);
        assert_eq!(bursts, 2);
        assert_eq!(port.vibrations(), 3);
    }

    #[test]
    fn realtime_run_respects_limit_for_infinite_loops() {
        let (mut controller, _) = controller();
        controller.set_pattern_text("10");
        controller.set_repeat(RepeatConfig::repeated(RepeatCount::Infinite, 0));
        controller.play_pattern_text().expect("play");
        assert!(controller.run_realtime(Some(30), |_| {}));
        assert!(controller.has_pending_work());
    }
}
