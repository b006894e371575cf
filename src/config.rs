use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::vibration::pattern::Pattern;

pub const DEFAULT_PATTERN_TEXT: &str = "100,50,100,50,200";
pub const DEFAULT_DURATION_MS: u64 = 200;
pub const MIN_DURATION_MS: u64 = 10;
pub const MAX_DURATION_MS: u64 = 1_000;
pub const DEFAULT_AUTO_DELAY_MS: u64 = 500;
pub const DEFAULT_SHARE_BASE_URL: &str = "http://localhost:8099/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub default_pattern: String,
    pub default_duration_ms: u64,
    pub auto_delay_ms: u64,
    pub library_path: PathBuf,
    pub share_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_pattern: DEFAULT_PATTERN_TEXT.to_string(),
            default_duration_ms: DEFAULT_DURATION_MS,
            auto_delay_ms: DEFAULT_AUTO_DELAY_MS,
            library_path: PathBuf::from("patterns.json"),
            share_base_url: DEFAULT_SHARE_BASE_URL.to_string(),
        }
    }
}

/// Loads settings from `path`. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file; using defaults");
            return Ok(Settings::default());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("unable to read settings file {}", path.display()));
        }
    };
    parse_settings_text(&content)
}

pub fn parse_settings_text(content: &str) -> Result<Settings> {
    let raw = serde_json::from_str::<SettingsFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported settings version {}; expected version 1",
            raw.version
        );
    }

    Pattern::parse(&raw.default_pattern).with_context(|| {
        format!(
            "default_pattern '{}' is not a valid pattern",
            raw.default_pattern
        )
    })?;
    if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&raw.default_duration_ms) {
        bail!(
            "default_duration_ms must be between {MIN_DURATION_MS} and {MAX_DURATION_MS}, got {}",
            raw.default_duration_ms
        );
    }

    Ok(Settings {
        default_pattern: raw.default_pattern,
        default_duration_ms: raw.default_duration_ms,
        auto_delay_ms: raw.auto_delay_ms,
        library_path: raw.library_path,
        share_base_url: raw.share_base_url,
    })
}

#[derive(Debug, Deserialize)]
struct SettingsFile {
    version: u32,
    #[serde(default = "default_pattern")]
    default_pattern: String,
    #[serde(default = "default_duration_ms")]
    default_duration_ms: u64,
    #[serde(default = "default_auto_delay_ms")]
    auto_delay_ms: u64,
    #[serde(default = "default_library_path")]
    library_path: PathBuf,
    #[serde(default = "default_share_base_url")]
    share_base_url: String,
}

fn default_pattern() -> String {
    DEFAULT_PATTERN_TEXT.to_string()
}

fn default_duration_ms() -> u64 {
    DEFAULT_DURATION_MS
}

fn default_auto_delay_ms() -> u64 {
    DEFAULT_AUTO_DELAY_MS
}

fn default_library_path() -> PathBuf {
    PathBuf::from("patterns.json")
}

fn default_share_base_url() -> String {
    DEFAULT_SHARE_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_settings() {
        let json = r#"
{
  "version": 1,
  "default_pattern": "200,100,200",
  "default_duration_ms": 300,
  "auto_delay_ms": 250,
  "library_path": "/tmp/lib.json",
  "share_base_url": "https://example.test/vibe/"
}
"#;
        let settings = parse_settings_text(json).expect("valid settings");
        assert_eq!(settings.default_pattern, "200,100,200");
        assert_eq!(settings.default_duration_ms, 300);
        assert_eq!(settings.auto_delay_ms, 250);
        assert_eq!(settings.library_path, PathBuf::from("/tmp/lib.json"));
        assert_eq!(settings.share_base_url, "https://example.test/vibe/");
    }

    #[test]
    fn missing_fields_use_defaults() {
        let settings = parse_settings_text(r#"{ "version": 1 }"#).expect("valid");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_settings_text(r#"{ "version": 2 }"#).expect_err("bad version");
        assert!(err.to_string().contains("unsupported settings version"));
    }

    #[test]
    fn rejects_invalid_default_pattern() {
        let err = parse_settings_text(r#"{ "version": 1, "default_pattern": "1,x" }"#)
            .expect_err("bad pattern");
        assert!(err.to_string().contains("default_pattern"));
    }

    #[test]
    fn rejects_out_of_range_duration() {
        let err = parse_settings_text(r#"{ "version": 1, "default_duration_ms": 5 }"#)
            .expect_err("bad duration");
        assert!(err.to_string().contains("default_duration_ms"));
    }

    #[test]
    fn malformed_json_reports_position() {
        let err = parse_settings_text("{ nope").expect_err("bad json");
        assert!(err.to_string().contains("invalid JSON at line 1"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(settings, Settings::default());
    }
}
