use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("pattern is empty; expected comma-separated milliseconds such as 100,50,100")]
    Empty,
    #[error("invalid pattern token '{token}'; expected a non-negative integer")]
    InvalidFormat { token: String },
}

/// Alternating vibrate/pause durations in milliseconds, starting with vibrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct Pattern(Vec<u64>);

impl Pattern {
    pub fn new(durations: Vec<u64>) -> Result<Self, ParseError> {
        if durations.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(Self(durations))
    }

    /// A single vibration of `duration_ms`.
    pub fn single(duration_ms: u64) -> Self {
        Self(vec![duration_ms])
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let durations = text
            .split(',')
            .map(|raw| {
                let token = raw.trim();
                token
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidFormat {
                        token: token.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(durations)
    }

    pub fn durations(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total_ms(&self) -> u64 {
        self.0.iter().fold(0_u64, |sum, value| sum.saturating_add(*value))
    }

    pub fn segments(&self) -> Vec<Segment> {
        let mut start_ms = 0_u64;
        self.0
            .iter()
            .enumerate()
            .map(|(index, duration_ms)| {
                let segment = Segment {
                    kind: if index % 2 == 0 {
                        SegmentKind::Vibrate
                    } else {
                        SegmentKind::Pause
                    },
                    start_ms,
                    duration_ms: *duration_ms,
                };
                start_ms = start_ms.saturating_add(*duration_ms);
                segment
            })
            .collect()
    }
}

impl TryFrom<Vec<u64>> for Pattern {
    type Error = ParseError;

    fn try_from(value: Vec<u64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Pattern> for Vec<u64> {
    fn from(value: Pattern) -> Self {
        value.0
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SegmentKind {
    Vibrate,
    Pause,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Preset {
    Short,
    Medium,
    Long,
    Double,
    Triple,
    Pulse,
    Sos,
    Alarm,
}

impl Preset {
    pub const ALL: [Preset; 8] = [
        Preset::Short,
        Preset::Medium,
        Preset::Long,
        Preset::Double,
        Preset::Triple,
        Preset::Pulse,
        Preset::Sos,
        Preset::Alarm,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Preset::Short => "short",
            Preset::Medium => "medium",
            Preset::Long => "long",
            Preset::Double => "double",
            Preset::Triple => "triple",
            Preset::Pulse => "pulse",
            Preset::Sos => "sos",
            Preset::Alarm => "alarm",
        }
    }

    pub fn pattern(self) -> Pattern {
        let durations: &[u64] = match self {
            Preset::Short => &[100],
            Preset::Medium => &[200],
            Preset::Long => &[500],
            Preset::Double => &[100, 100, 100],
            Preset::Triple => &[100, 100, 100, 100, 100],
            Preset::Pulse => &[100, 50, 100, 50, 100, 50, 100],
            Preset::Sos => &[
                100, 100, 100, 100, 100, 300, 200, 100, 200, 100, 200, 300, 100, 100, 100,
            ],
            Preset::Alarm => &[200, 100, 200, 100, 200, 100, 200],
        };
        Pattern(durations.to_vec())
    }
}
