//! What a command hands back to the shell.

use crate::app::input::InputError;
use crate::state::model::*;
use serde::Serialize;
use std::time::Duration;

/// Number of history entries shown by `/stats`.
pub const RECENT_RECORDS: usize = 5;

/// The uniform outcome of a command.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct CommandResult {
    /// Whether the command did what was asked, including harmless no-ops.
    pub success: bool,
    /// Set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// A successful result carrying `message`.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    /// A failed result carrying `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Whether the clock is counting down.
#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockState {
    Running,
    /// Stopped part way through the phase.
    Paused,
    /// Stopped at the full phase length.
    Idle,
}

/// A snapshot of the timer, as shown on the clock line.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ClockView {
    /// Label of the current phase, e.g. `Short Break`.
    pub phase: String,
    pub state: ClockState,
    pub session_name: String,
    /// Seconds left in the phase.
    pub remaining_secs: u32,
    /// Length of the phase in seconds.
    pub total_secs: u32,
    /// Seconds already spent in the phase.
    pub elapsed_secs: u32,
    /// Focus phases completed this session.
    pub pomodoro_count: u32,
}

impl ClockView {
    /// Snapshot `timer` in `phase`, named after the current session.
    pub fn new(timer: &TimerState, phase: Phase, settings: &Settings) -> Self {
        let state = if timer.is_running {
            ClockState::Running
        } else if timer.current_time < timer.total_time {
            ClockState::Paused
        } else {
            ClockState::Idle
        };
        Self {
            phase: phase.label().to_string(),
            state,
            session_name: settings.session_name.clone(),
            remaining_secs: timer.current_time,
            total_secs: timer.total_time,
            elapsed_secs: timer.elapsed(),
            pomodoro_count: timer.pomodoro_count,
        }
    }
}

/// The `/stats` summary.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StatsView {
    /// Focus phases completed today.
    pub completed_today: u32,
    /// Total focus time in minutes.
    pub total_focus_time: u32,
    /// Total focus time in human-readable form, e.g. `1h 15m`.
    pub focus_time: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// The most recent history entries, newest first.
    pub recent: Vec<SessionRecord>,
}

impl From<&Stats> for StatsView {
    fn from(stats: &Stats) -> Self {
        let focus_time = Duration::from_secs(u64::from(stats.total_focus_time) * 60);
        Self {
            completed_today: stats.completed_today,
            total_focus_time: stats.total_focus_time,
            focus_time: humantime::format_duration(focus_time).to_string(),
            current_streak: stats.current_streak,
            longest_streak: stats.longest_streak,
            recent: stats.history.iter().rev().take(RECENT_RECORDS).cloned().collect(),
        }
    }
}

/// One row of the `/help` table.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct HelpEntry {
    /// Command name without the leading slash.
    pub name: &'static str,
    /// Synopsis with arguments.
    pub usage: &'static str,
    pub description: &'static str,
}

impl HelpEntry {
    const fn new(name: &'static str, usage: &'static str, description: &'static str) -> Self {
        Self {
            name,
            usage,
            description,
        }
    }
}

/// Every command the interpreter understands, in `/help` order.
pub const COMMANDS: &[HelpEntry] = &[
    HelpEntry::new("play", "/play", "Start or resume the timer"),
    HelpEntry::new("pause", "/pause", "Pause the timer"),
    HelpEntry::new("reset", "/reset", "Restart the current phase"),
    HelpEntry::new("complete", "/complete", "Finish the current phase now"),
    HelpEntry::new("commit", "/commit \"<text>\"", "Log the time spent so far with a message"),
    HelpEntry::new("session", "/session \"<text>\"", "Rename the current session"),
    HelpEntry::new("set", "/set {work|break|long} <minutes>", "Change a phase length (1-1440 minutes)"),
    HelpEntry::new("theme", "/theme [light|dark]", "Set or toggle the theme"),
    HelpEntry::new("sound", "/sound [on|off]", "Set or toggle the completion sound"),
    HelpEntry::new("stats", "/stats", "Show your statistics and recent sessions"),
    HelpEntry::new("sync", "/sync", "Reload settings and stats from the store"),
    HelpEntry::new("help", "/help", "Show this list"),
    HelpEntry::new("clear", "/clear", "Clear the screen"),
    HelpEntry::new("logout", "/logout", "Sign out and exit"),
    HelpEntry::new("reset-data", "/reset-data", "Delete all settings, stats and history"),
    HelpEntry::new("confirm-reset", "/confirm-reset", "Confirm a pending /reset-data"),
];

/// Something for the shell to show.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum OutputEvent {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
    Clock(ClockView),
    Stats(StatsView),
    Help(Vec<HelpEntry>),
    Clear,
    Bell,
}

/// A destructive action that runs after a delay.
#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeferredAction {
    Logout,
    ResetData,
}

/// A [`DeferredAction`] and how long to wait before running it.
#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Deferred {
    pub action: DeferredAction,
    /// Time between the reply and the action.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

/// A [`CommandResult`] plus what to show and what to do next.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Reply {
    pub result: CommandResult,
    /// Shown in order.
    pub events: Vec<OutputEvent>,
    /// Run by the shell once its delay has passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred: Option<Deferred>,
}

impl Reply {
    /// A reply with `result` and nothing to show.
    pub fn new(result: CommandResult) -> Self {
        Self {
            result,
            events: Vec::new(),
            deferred: None,
        }
    }

    /// A successful result shown as a success event.
    pub fn success(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(CommandResult::ok(message.clone())).with_event(OutputEvent::Success(message))
    }

    /// A successful result for a no-op or a step that needs follow-up.
    pub fn warning(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(CommandResult::ok(message.clone())).with_event(OutputEvent::Warning(message))
    }

    /// A failed result shown as an error event.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(CommandResult::failed(error.clone())).with_event(OutputEvent::Error(error))
    }

    /// Append an event to show.
    pub fn with_event(mut self, event: OutputEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Schedule `action` to run after `delay`.
    pub fn with_deferred(mut self, action: DeferredAction, delay: Duration) -> Self {
        self.deferred = Some(Deferred { action, delay });
        self
    }
}

impl From<InputError> for Reply {
    fn from(err: InputError) -> Self {
        Self::failure(err.to_string())
    }
}
