mod api;
mod config;
mod controller;
mod library;
mod offline;
mod share;
mod storage;
mod timer;
mod vibration;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::EnvFilter;

use crate::api::{ApiServerConfig, ApiState};
use crate::config::{Settings, load_settings};
use crate::controller::{ControlError, Controller};
use crate::library::PatternLibrary;
use crate::offline::{AssetCache, AssetSource, DirAssets, EmbeddedAssets};
use crate::share::{ClipboardSink, CopyMethod, ManualCopy, SystemClipboard, export_share_url};
use crate::storage::JsonFileStore;
use crate::timer::TimerQueue;
use crate::vibration::pattern::{Pattern, Preset};
use crate::vibration::port::{VibrationBackend, VibrationPort, probe};
use crate::vibration::scheduler::{RepeatConfig, RepeatCount, TimerEvent};
use crate::vibration::timeline::{describe_segments, format_ms, render_timeline};

type CliController = Controller<Box<dyn VibrationPort>, TimerQueue>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliBackend {
    Console,
    None,
}

impl From<CliBackend> for VibrationBackend {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Console => VibrationBackend::Console,
            CliBackend::None => VibrationBackend::None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliPreset {
    Short,
    Medium,
    Long,
    Double,
    Triple,
    Pulse,
    Sos,
    Alarm,
}

impl From<CliPreset> for Preset {
    fn from(value: CliPreset) -> Self {
        match value {
            CliPreset::Short => Preset::Short,
            CliPreset::Medium => Preset::Medium,
            CliPreset::Long => Preset::Long,
            CliPreset::Double => Preset::Double,
            CliPreset::Triple => Preset::Triple,
            CliPreset::Pulse => Preset::Pulse,
            CliPreset::Sos => Preset::Sos,
            CliPreset::Alarm => Preset::Alarm,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "vibekit",
    version,
    about = "Vibration pattern toolbox with repeat scheduling and share links"
)]
struct Cli {
    #[arg(long, global = true, default_value = "vibekit.json")]
    config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = CliBackend::Console)]
    backend: CliBackend,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in preset patterns
    Presets,
    /// Draw a pattern's vibrate/pause timeline
    Show {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, default_value_t = 40)]
        width: usize,
    },
    /// Vibrate a preset, pattern or single duration
    Play {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        repeat: RepeatArgs,
        /// Stop after this many milliseconds (useful with --repeat infinite)
        #[arg(long)]
        for_ms: Option<u64>,
    },
    /// Build a share link for the given configuration and copy it
    Share {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        repeat: RepeatArgs,
        #[arg(long)]
        base_url: Option<String>,
        /// Print the link instead of using the system clipboard
        #[arg(long)]
        no_clipboard: bool,
    },
    /// Load a share link and honor its auto-run flag
    Open {
        link: String,
        #[arg(long)]
        for_ms: Option<u64>,
    },
    /// Manage saved patterns
    Library {
        #[arg(long)]
        library: Option<PathBuf>,
        #[command(subcommand)]
        action: LibraryCommand,
    },
    /// Serve the web UI and JSON API on the local network
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8099)]
        port: u16,
        #[arg(long)]
        library: Option<PathBuf>,
        /// Serve the UI from this directory, keeping the built-in copy as the offline fallback
        #[arg(long)]
        web_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum LibraryCommand {
    List,
    Save {
        name: String,
        pattern: String,
    },
    Rename {
        id: i64,
        name: String,
    },
    Favorite {
        id: i64,
    },
    Delete {
        id: i64,
    },
    Reorder {
        dragged: i64,
        target: i64,
    },
    Play {
        id: i64,
        #[command(flatten)]
        repeat: RepeatArgs,
        #[arg(long)]
        for_ms: Option<u64>,
    },
}

#[derive(Args, Debug, Clone)]
#[group(multiple = false)]
struct TargetArgs {
    #[arg(long, value_enum)]
    preset: Option<CliPreset>,
    /// Comma-separated milliseconds, alternating vibrate and pause
    #[arg(long)]
    pattern: Option<String>,
    #[arg(long, value_parser = clap::value_parser!(u64).range(10..=1000))]
    duration: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct RepeatArgs {
    /// Repeat count between 2 and 10, or "infinite"
    #[arg(long, value_parser = parse_repeat_count)]
    repeat: Option<RepeatCount>,
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(0..=2000))]
    interval: u64,
}

impl RepeatArgs {
    fn config(&self) -> RepeatConfig {
        match self.repeat {
            Some(count) => RepeatConfig::repeated(count, self.interval),
            None => RepeatConfig {
                interval_ms: self.interval,
                ..RepeatConfig::once()
            },
        }
    }
}

fn parse_repeat_count(input: &str) -> Result<RepeatCount, String> {
    RepeatCount::parse(input)
        .ok_or_else(|| format!("'{input}' is not 'infinite' or a count between 2 and 10"))
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

/// Logs to stderr, or appends to `VIBEKIT_LOG_PATH` when it is set.
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    if let Ok(path) = std::env::var("VIBEKIT_LOG_PATH")
        && let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(file)
            .init();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Presets => {
            for preset in Preset::ALL {
                let pattern = preset.pattern();
                println!(
                    "{:<7} {:<48} {}",
                    preset.name(),
                    pattern.to_string(),
                    format_ms(pattern.total_ms())
                );
            }
            Ok(())
        }
        Command::Show { target, width } => {
            let pattern = target_pattern(&target, &settings)?;
            println!("{}", render_timeline(&pattern, width));
            for line in describe_segments(&pattern) {
                println!("  {line}");
            }
            println!(
                "{} segments, total {}",
                pattern.len(),
                format_ms(pattern.total_ms())
            );
            Ok(())
        }
        Command::Play {
            target,
            repeat,
            for_ms,
        } => {
            let mut controller = build_controller(cli.backend, settings);
            if !controller.controls_enabled() {
                println!("{}", controller.status_message());
                return Ok(());
            }
            controller.set_repeat(repeat.config());
            play_target(&mut controller, &target)?;
            drive(&mut controller, for_ms)
        }
        Command::Share {
            target,
            repeat,
            base_url,
            no_clipboard,
        } => {
            let base_url = base_url.unwrap_or_else(|| settings.share_base_url.clone());
            let mut controller = build_controller(cli.backend, settings);
            apply_target(&mut controller, &target);
            controller.set_repeat(repeat.config());
            let url = controller.share_url(&base_url);

            let mut manual = ManualCopy::new(io::stdout());
            let method = if no_clipboard {
                manual.write_text(&url)?;
                CopyMethod::Manual
            } else {
                export_share_url(&url, &mut SystemClipboard, &mut manual)?
            };
            if method == CopyMethod::Clipboard {
                println!("copied {url}");
            }
            Ok(())
        }
        Command::Open { link, for_ms } => {
            let mut controller = build_controller(cli.backend, settings);
            let outcome = controller.hydrate(&link);
            println!("pattern:  {}", controller.pattern_text());
            println!("duration: {}ms", controller.duration_ms());
            let repeat = controller.repeat();
            if repeat.enabled {
                println!("repeat:   {} every +{}ms", repeat.count, repeat.interval_ms);
            }
            if !controller.controls_enabled() {
                println!("{}", controller.status_message());
                return Ok(());
            }
            if outcome.auto_scheduled {
                println!("auto-run scheduled");
                drive(&mut controller, for_ms)?;
            }
            Ok(())
        }
        Command::Library { library, action } => {
            let path = library.unwrap_or_else(|| settings.library_path.clone());
            let mut patterns = PatternLibrary::new(JsonFileStore::new(path));
            run_library(cli.backend, settings, &mut patterns, action)
        }
        Command::Serve {
            bind,
            port,
            library,
            web_dir,
        } => {
            let library_path = library.unwrap_or_else(|| settings.library_path.clone());
            let share_base_url = settings.share_base_url.clone();
            let controller = build_controller(cli.backend, settings);
            if !controller.controls_enabled() {
                tracing::warn!(message = %controller.status_message(), "serving with controls disabled");
            }

            let asset_source: Box<dyn AssetSource> = match web_dir {
                Some(dir) => Box::new(DirAssets::new(dir)),
                None => Box::new(EmbeddedAssets),
            };
            let mut assets = AssetCache::new();
            assets.install(&EmbeddedAssets);
            assets.install(asset_source.as_ref());
            assets.activate();

            let mut state = ApiState {
                controller,
                library: PatternLibrary::new(JsonFileStore::new(library_path)),
                assets,
                asset_source,
                share_base_url,
            };
            println!("serving on http://{bind}:{port}/");
            api::serve(&ApiServerConfig { bind_addr: bind, port }, &mut state)
        }
    }
}

fn run_library(
    backend: CliBackend,
    settings: Settings,
    patterns: &mut PatternLibrary<JsonFileStore>,
    action: LibraryCommand,
) -> Result<()> {
    match action {
        LibraryCommand::List => {
            let listed = patterns.list();
            if listed.is_empty() {
                println!("no saved patterns");
            }
            for saved in listed {
                println!(
                    "{:>14} {} {:<20} {:<32} {}",
                    saved.id,
                    if saved.favorite { "★" } else { " " },
                    saved.name,
                    saved.pattern_text,
                    saved.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        LibraryCommand::Save { name, pattern } => {
            let saved = patterns.save(&name, &pattern)?;
            println!("saved '{}' as {}", saved.name, saved.id);
        }
        LibraryCommand::Rename { id, name } => {
            let renamed = patterns.rename(id, &name)?;
            println!("renamed {} to '{}'", renamed.id, renamed.name);
        }
        LibraryCommand::Favorite { id } => {
            let toggled = patterns.toggle_favorite(id)?;
            let state = if toggled.favorite { "added to" } else { "removed from" };
            println!("'{}' {state} favorites", toggled.name);
        }
        LibraryCommand::Delete { id } => {
            if patterns.delete(id)? {
                println!("deleted {id}");
            } else {
                println!("no saved pattern with id {id}");
            }
        }
        LibraryCommand::Reorder { dragged, target } => {
            if patterns.reorder_favorites(dragged, target)? {
                println!("moved {dragged} to the position of {target}");
            } else {
                println!("nothing to reorder; both ids must be favorites");
            }
        }
        LibraryCommand::Play {
            id,
            repeat,
            for_ms,
        } => {
            let pattern = patterns.replay(id)?;
            let mut controller = build_controller(backend, settings);
            if !controller.controls_enabled() {
                println!("{}", controller.status_message());
                return Ok(());
            }
            controller.set_repeat(repeat.config());
            controller.play(pattern)?;
            drive(&mut controller, for_ms)?;
        }
    }
    Ok(())
}

fn build_controller(backend: CliBackend, settings: Settings) -> CliController {
    let probed = probe(backend.into());
    Controller::new(probed.capability, settings, probed.port, TimerQueue::new())
}

fn target_pattern(target: &TargetArgs, settings: &Settings) -> Result<Pattern> {
    if let Some(preset) = target.preset {
        return Ok(Preset::from(preset).pattern());
    }
    if let Some(duration) = target.duration {
        return Ok(Pattern::single(duration));
    }
    let text = target.pattern.as_deref().unwrap_or(&settings.default_pattern);
    Pattern::parse(text).with_context(|| format!("invalid pattern '{text}'"))
}

/// Copies the chosen target into the controller's inputs without playing it.
fn apply_target(controller: &mut CliController, target: &TargetArgs) {
    if let Some(preset) = target.preset {
        controller.set_pattern_text(Preset::from(preset).pattern().to_string());
    } else if let Some(text) = &target.pattern {
        controller.set_pattern_text(text.clone());
    } else if let Some(duration) = target.duration {
        controller.set_duration_ms(duration);
    }
}

fn play_target(
    controller: &mut CliController,
    target: &TargetArgs,
) -> Result<Pattern, ControlError> {
    if let Some(preset) = target.preset {
        return controller.play_preset(preset.into());
    }
    if let Some(duration) = target.duration {
        controller.set_duration_ms(duration);
        return controller.play_duration();
    }
    if let Some(text) = &target.pattern {
        controller.set_pattern_text(text.clone());
    }
    controller.play_pattern_text()
}

fn drive(controller: &mut CliController, for_ms: Option<u64>) -> Result<()> {
    if let Some(status) = controller.repeat_status() {
        println!("repeat {status}");
    }
    let cut_short = controller.run_realtime(for_ms, |event| match event {
        TimerEvent::Burst(status) => println!("repeat {status}"),
        TimerEvent::Completed(status) => println!("repeat finished: {status}"),
        TimerEvent::DeferredRun => println!("auto-run started"),
    });
    if cut_short {
        controller.stop()?;
        println!("stopped after {}", format_ms(for_ms.unwrap_or_default()));
    }
    Ok(())
}
