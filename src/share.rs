use std::borrow::Cow;
use std::io::Write;

use thiserror::Error;

use crate::config::{MAX_DURATION_MS, MIN_DURATION_MS};
use crate::vibration::pattern::Preset;
use crate::vibration::scheduler::{MAX_INTERVAL_MS, RepeatConfig, RepeatCount};

/// The URL-encodable part of the active configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareState {
    pub pattern_text: String,
    pub duration_ms: u64,
    pub repeat: RepeatConfig,
}

/// Values a share link is compared against; only differences are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDefaults {
    pub pattern_text: String,
    pub duration_ms: u64,
}

/// Best-effort result of reading a query string. Invalid values are left as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedShare {
    pub preset: Option<Preset>,
    pub preset_requested: bool,
    pub pattern_text: Option<String>,
    pub duration_ms: Option<u64>,
    pub duration_requested: bool,
    pub repeat_enabled: bool,
    pub repeat_count: Option<RepeatCount>,
    pub interval_ms: Option<u64>,
    pub auto: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AutoSource {
    Preset,
    Pattern,
    Duration,
}

impl DecodedShare {
    /// Which input a deferred auto-run uses, by precedence preset > pattern > duration.
    pub fn auto_source(&self) -> Option<AutoSource> {
        if !self.auto {
            return None;
        }
        if self.preset_requested {
            Some(AutoSource::Preset)
        } else if self.pattern_text.is_some() {
            Some(AutoSource::Pattern)
        } else if self.duration_requested {
            Some(AutoSource::Duration)
        } else {
            None
        }
    }
}

pub fn encode(state: &ShareState, defaults: &ShareDefaults) -> String {
    let mut params: Vec<(&str, String)> = Vec::new();

    if !state.pattern_text.is_empty() && state.pattern_text != defaults.pattern_text {
        params.push(("pattern", state.pattern_text.clone()));
    } else if state.duration_ms != defaults.duration_ms {
        params.push(("duration", state.duration_ms.to_string()));
    }

    if state.repeat.enabled {
        params.push(("enabled", "1".to_string()));
        params.push(("repeat", state.repeat.count.to_string()));
        params.push(("interval", state.repeat.interval_ms.to_string()));
    }

    params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn share_url(base_url: &str, query: &str) -> String {
    if query.is_empty() {
        base_url.to_string()
    } else {
        format!("{base_url}?{query}")
    }
}

pub fn decode(input: &str) -> DecodedShare {
    let query = query_part(input);
    let mut decoded = DecodedShare::default();

    if let Some(preset) = query_param(query, "preset") {
        decoded.preset_requested = true;
        decoded.preset = Preset::from_name(&preset);
        if decoded.preset.is_none() {
            tracing::debug!(preset = %preset, "ignoring unknown preset");
        }
    }

    decoded.pattern_text = query_param(query, "pattern").map(Cow::into_owned);

    if let Some(raw) = query_param(query, "duration") {
        decoded.duration_requested = true;
        decoded.duration_ms = parse_in_range(&raw, MIN_DURATION_MS, MAX_DURATION_MS);
    }

    if query_param(query, "enabled").as_deref() == Some("1") {
        decoded.repeat_enabled = true;
        decoded.repeat_count = query_param(query, "repeat").and_then(|raw| RepeatCount::parse(&raw));
        decoded.interval_ms = query_param(query, "interval")
            .and_then(|raw| parse_in_range(&raw, 0, MAX_INTERVAL_MS));
    }

    decoded.auto = query_param(query, "auto").as_deref() == Some("1");
    decoded
}

/// Accepts a bare query, a `?query`, or a full URL.
pub fn query_part(input: &str) -> &str {
    let input = input.trim();
    let without_fragment = input.split_once('#').map_or(input, |(head, _)| head);
    match without_fragment.split_once('?') {
        Some((_, query)) => query,
        None if without_fragment.contains('=') => without_fragment,
        None => "",
    }
}

/// First value for `key`, form-decoded. Later duplicates are ignored.
pub fn query_param<'a>(query: &'a str, key: &str) -> Option<Cow<'a, str>> {
    for pair in query.split('&') {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        if form_decode(raw_key) == key {
            return Some(form_decode(raw_value));
        }
    }
    None
}

fn form_decode(raw: &str) -> Cow<'_, str> {
    if raw.contains('+') {
        let spaced = raw.replace('+', " ");
        let decoded = urlencoding::decode(&spaced)
            .map(Cow::into_owned)
            .unwrap_or_else(|_| spaced.clone());
        return Cow::Owned(decoded);
    }
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

fn parse_in_range(raw: &str, min: u64, max: u64) -> Option<u64> {
    let value = raw.trim().parse::<u64>().ok()?;
    (min..=max).contains(&value).then_some(value)
}

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("could not copy the link (clipboard: {primary}; manual copy: {fallback})")]
    BothFailed { primary: String, fallback: String },
}

pub trait ClipboardSink {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// The desktop clipboard.
pub struct SystemClipboard;

impl ClipboardSink for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|err| ClipboardError::Unavailable(err.to_string()))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|err| ClipboardError::Unavailable(err.to_string()))
    }
}

/// Prints the link on its own line so it can be selected by hand.
pub struct ManualCopy<W: Write> {
    out: W,
}

impl<W: Write> ManualCopy<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ClipboardSink for ManualCopy<W> {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        writeln!(self.out, "{text}")
            .and_then(|_| self.out.flush())
            .map_err(|err| ClipboardError::Unavailable(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CopyMethod {
    Clipboard,
    Manual,
}

pub fn export_share_url(
    url: &str,
    primary: &mut dyn ClipboardSink,
    fallback: &mut dyn ClipboardSink,
) -> Result<CopyMethod, ClipboardError> {
    let primary_err = match primary.write_text(url) {
        Ok(()) => return Ok(CopyMethod::Clipboard),
        Err(err) => err,
    };
    tracing::warn!(error = %primary_err, "clipboard copy failed; falling back to manual copy");
    match fallback.write_text(url) {
        Ok(()) => Ok(CopyMethod::Manual),
        Err(fallback_err) => Err(ClipboardError::BothFailed {
            primary: primary_err.to_string(),
            fallback: fallback_err.to_string(),
        }),
    }
}
