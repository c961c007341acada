use crate::app::cmd::InterpreterOptions;
use crate::app::render::{DEFAULT_CLOCK_TEMPLATE, DEFAULT_STATS_TEMPLATE};
use crate::state::model::*;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::time::Duration;

/// Runtime configuration loaded from `$XDG_CONFIG_HOME/pomoterm/config.toml`.
///
/// All fields are optional in the file; missing keys fall back to the
/// [`Default`] values.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Identity used to create the user document on first login.
    pub profile: Profile,
    /// Length of a focus phase for a new user (default: 25 minutes).
    #[serde(with = "humantime_serde")]
    pub work_duration: Duration,
    /// Length of a short break for a new user (default: 5 minutes).
    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,
    /// Length of a long break for a new user (default: 15 minutes).
    #[serde(with = "humantime_serde")]
    pub long_break_duration: Duration,
    /// Delay before `/logout` and `/confirm-reset` take effect.
    #[serde(with = "humantime_serde")]
    pub action_delay: Duration,
    /// How long `/reset-data` waits for `/confirm-reset`.
    #[serde(with = "humantime_serde")]
    pub reset_window: Duration,
    /// MiniJinja template for the clock line.
    pub clock_format: String,
    /// MiniJinja template for the `/stats` summary.
    pub stats_format: String,
}

impl ProgramConfig {
    /// Load configuration from `$XDG_CONFIG_HOME/pomoterm/config.toml`.
    ///
    /// Returns an error if the file cannot be read or parsed. Callers
    /// should fall back to [`Default`] when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = xdg::BaseDirectories::with_prefix("pomoterm")
            .place_config_file("config.toml")
            .context("Failed to determine configuration path")?;

        let content = std::fs::read(path).context("Failed to read configuration file")?;
        toml::from_slice(&content[..]).context("Failed to load configuration file")
    }

    /// The document a new user starts from.
    pub fn seed(&self) -> UserSeed {
        UserSeed {
            profile: self.profile.clone(),
            settings: Settings {
                work_duration: phase_secs(self.work_duration),
                break_duration: phase_secs(self.break_duration),
                long_break_duration: phase_secs(self.long_break_duration),
                ..Settings::default()
            },
            stats: Stats::default(),
        }
    }

    /// The interpreter tunables set in the file.
    pub fn interpreter_options(&self) -> InterpreterOptions {
        InterpreterOptions {
            action_delay: self.action_delay,
            reset_window: self.reset_window,
        }
    }
}

/// A phase length in whole seconds, at least one.
fn phase_secs(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX).max(1)
}

impl Default for ProgramConfig {
    fn default() -> Self {
        let settings = Settings::default();
        let options = InterpreterOptions::default();
        Self {
            profile: Profile::default(),
            work_duration: Duration::from_secs(settings.work_duration.into()),
            break_duration: Duration::from_secs(settings.break_duration.into()),
            long_break_duration: Duration::from_secs(settings.long_break_duration.into()),
            action_delay: options.action_delay,
            reset_window: options.reset_window,
            clock_format: DEFAULT_CLOCK_TEMPLATE.to_string(),
            stats_format: DEFAULT_STATS_TEMPLATE.to_string(),
        }
    }
}

/// Program is the main entry point for the pomoterm CLI application.
#[derive(Parser)]
#[command(name = "pomoterm")]
#[command(about = "A command-driven pomodoro timer", version)]
pub struct Program {
    /// Use an ephemeral in-memory database (data is not persisted)
    #[arg(
        long = "in-memory",
        global = true,
        default_value_t = false,
        hide = true
    )]
    pub in_memory: bool,

    /// Skip hook execution for this invocation.
    #[arg(long = "no-hooks", global = true, default_value_t = false, hide = true)]
    pub no_hooks: bool,

    /// Sign in as this user instead of the configured profile.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Output specifies how replies are printed.
    #[arg(help = "The output type")]
    #[arg(default_value_t = OutputFormat::Text)]
    #[arg(short, long, global = true)]
    pub output: OutputFormat,

    /// Command specifies the subcommand to execute. Defaults to `shell`.
    #[command(subcommand)]
    pub command: Option<ProgramCommand>,
}

/// Top-level subcommand dispatched by [`Program`].
#[derive(Debug, Subcommand)]
pub enum ProgramCommand {
    /// Read commands from stdin until end of input or `/logout`.
    #[command(name = "shell")]
    #[command(about = "Read timer commands from stdin")]
    Shell,

    /// Run the given command lines in order, then exit.
    #[command(name = "exec")]
    #[command(about = "Run timer commands given as arguments")]
    Exec(ExecCommandArgs),
}

/// Arguments for the `exec` subcommand.
#[derive(Debug, Args, Default)]
pub struct ExecCommandArgs {
    /// Each argument is one command line, e.g. `"/set work 50"`.
    #[arg(help = "Command lines to run", required = true, value_parser = parse_line)]
    pub lines: Vec<String>,
}

/// Accept a single command line; a line break would split it in two.
fn parse_line(value: &str) -> std::result::Result<String, String> {
    if value.contains(['\n', '\r']) {
        return Err("a command line cannot contain line breaks".to_string());
    }
    Ok(value.to_string())
}

/// OutputFormat defines how replies are printed.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Text output renders each event of a reply on its own line.
    #[default]
    Text,

    /// Json output prints each reply as one JSON object per line.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
