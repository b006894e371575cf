use std::io::{self, Write};

use crate::vibration::pattern::Pattern;
use crate::vibration::timeline::render_timeline;

/// Host capability that physically vibrates the device.
pub trait VibrationPort {
    fn vibrate(&mut self, pattern: &Pattern);
    /// Cancels any ongoing vibration, equivalent to a zero-length pattern.
    fn cancel(&mut self);
}

impl<P: VibrationPort + ?Sized> VibrationPort for Box<P> {
    fn vibrate(&mut self, pattern: &Pattern) {
        (**self).vibrate(pattern);
    }

    fn cancel(&mut self) {
        (**self).cancel();
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Capability {
    Available,
    Unavailable { reason: String },
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available)
    }

    pub fn status_message(&self) -> String {
        match self {
            Capability::Available => "Vibration is available on this device".to_string(),
            Capability::Unavailable { reason } => {
                format!("Vibration is not available on this device: {reason}")
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VibrationBackend {
    Console,
    None,
}

pub struct ProbedPort {
    pub port: Box<dyn VibrationPort>,
    pub capability: Capability,
}

pub fn probe(backend: VibrationBackend) -> ProbedPort {
    match backend {
        VibrationBackend::Console => ProbedPort {
            port: Box::new(ConsoleVibrator::new(io::stdout())),
            capability: Capability::Available,
        },
        VibrationBackend::None => ProbedPort {
            port: Box::new(NullVibrator),
            capability: Capability::Unavailable {
                reason: "no vibration backend is configured".to_string(),
            },
        },
    }
}

/// Renders every burst as a timeline line.
pub struct ConsoleVibrator<W: Write> {
    out: W,
    bursts: u64,
}

impl<W: Write> ConsoleVibrator<W> {
    pub fn new(out: W) -> Self {
        Self { out, bursts: 0 }
    }
}

impl<W: Write> VibrationPort for ConsoleVibrator<W> {
    fn vibrate(&mut self, pattern: &Pattern) {
        self.bursts += 1;
        tracing::debug!(burst = self.bursts, pattern = %pattern, "vibrate");
        let _ = writeln!(
            self.out,
            "burst {:>3} {}",
            self.bursts,
            render_timeline(pattern, 40)
        );
        let _ = self.out.flush();
    }

    fn cancel(&mut self) {
        tracing::debug!("vibration cancelled");
        let _ = writeln!(self.out, "vibration stopped");
        let _ = self.out.flush();
    }
}

pub struct NullVibrator;

impl VibrationPort for NullVibrator {
    fn vibrate(&mut self, _pattern: &Pattern) {}

    fn cancel(&mut self) {}
}
