use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Maximum number of [`SessionRecord`]s retained in [`Stats::history`] and in
/// the store's session-record collection.
pub const HISTORY_LIMIT: usize = 50;
/// Upper bound for [`Stats::completed_today`].
pub const COMPLETED_TODAY_MAX: u32 = 1000;
/// Upper bound for [`SessionRecord::duration_minutes`].
pub const RECORD_MINUTES_MAX: u32 = 480;
/// Maximum length of [`Settings::session_name`], in characters.
pub const SESSION_NAME_MAX_LEN: usize = 100;
/// Maximum length of [`SessionRecord::commit_message`], in characters.
pub const COMMIT_MESSAGE_MAX_LEN: usize = 500;

/// A trait for mapping a database [`Row`] to a concrete type.
///
/// Implement this trait for any struct that should be constructable directly
/// from a SQLite query result row.
pub trait FromRow {
    /// Map the columns of `row` to `Self`, returning a [`rusqlite::Error`] on
    /// any type mismatch or missing column.
    fn from_row(row: &Row) -> rusqlite::Result<Self>
    where
        Self: Sized;
}

/// Colour scheme preference stored with the user's [`Settings`].
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    /// Return the other theme.
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Dark => write!(f, "dark"),
        }
    }
}

impl TryFrom<&str> for Theme {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

/// Per-user preferences. Durations are stored in seconds.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Length of a focus phase in seconds.
    pub work_duration: u32,
    /// Length of a short break in seconds.
    pub break_duration: u32,
    /// Length of a long break in seconds.
    pub long_break_duration: u32,
    pub theme: Theme,
    pub sound_enabled: bool,
    /// Label of the current session, rewritten on every phase transition.
    pub session_name: String,
}

/// Returns the first-login defaults: 25 minute focus, 5 minute break,
/// 15 minute long break, dark theme and sound on.
impl Default for Settings {
    fn default() -> Self {
        Self {
            work_duration: 25 * 60,
            break_duration: 5 * 60,
            long_break_duration: 15 * 60,
            theme: Theme::Dark,
            sound_enabled: true,
            session_name: Phase::Work.label().to_string(),
        }
    }
}

/// The kind of a completed phase, as recorded by the ledger.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Work,
    Break,
}

impl Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Work => write!(f, "work"),
            Self::Break => write!(f, "break"),
        }
    }
}

/// A single interval of the timer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    /// Focus interval.
    Work,
    /// Break taken after most focus intervals.
    ShortBreak,
    /// Break taken after every fourth focus interval.
    LongBreak,
}

impl Phase {
    /// Return the fixed session label written to [`Settings::session_name`]
    /// when this phase begins.
    pub fn label(self) -> &'static str {
        match self {
            Self::Work => "Focus Session",
            Self::ShortBreak => "Short Break",
            Self::LongBreak => "Long Break",
        }
    }

    /// Collapse the phase into the work/break distinction used by the ledger.
    pub fn kind(self) -> PhaseKind {
        match self {
            Self::Work => PhaseKind::Work,
            Self::ShortBreak | Self::LongBreak => PhaseKind::Break,
        }
    }

    /// The configured length of this phase in seconds.
    pub fn duration(self, settings: &Settings) -> u32 {
        match self {
            Self::Work => settings.work_duration,
            Self::ShortBreak => settings.break_duration,
            Self::LongBreak => settings.long_break_duration,
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The live countdown. Never persisted; rebuilt from [`Settings`] each session.
///
/// Invariant: `0 <= current_time <= total_time`.
#[derive(Clone, PartialEq, Debug)]
pub struct TimerState {
    /// Seconds left in the current phase.
    pub current_time: u32,
    /// Length of the current phase in seconds.
    pub total_time: u32,
    pub is_running: bool,
    pub is_break: bool,
    /// Number of completed focus phases this session.
    pub pomodoro_count: u32,
}

impl TimerState {
    /// A stopped focus phase at full duration.
    pub fn fresh(settings: &Settings) -> Self {
        Self {
            current_time: settings.work_duration,
            total_time: settings.work_duration,
            is_running: false,
            is_break: false,
            pomodoro_count: 0,
        }
    }

    /// Seconds already spent in the current phase.
    pub fn elapsed(&self) -> u32 {
        self.total_time.saturating_sub(self.current_time)
    }
}

/// An immutable log entry for one completed or committed phase.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_name: String,
    pub is_break: bool,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    /// Rounded length of the phase, 0 to [`RECORD_MINUTES_MAX`].
    pub duration_minutes: u32,
    /// Present only on records created by a manual commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

impl FromRow for SessionRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            session_name: row.get("session_name")?,
            is_break: row.get("is_break")?,
            timestamp: row.get("timestamp")?,
            duration_minutes: row.get("duration_minutes")?,
            commit_message: row.get("commit_message")?,
        })
    }
}

/// Cumulative statistics maintained by the ledger.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub completed_today: u32,
    /// Accumulated focus time in minutes.
    pub total_focus_time: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Oldest first, capped at [`HISTORY_LIMIT`].
    #[serde(default)]
    pub history: Vec<SessionRecord>,
}

/// Identity fields used to seed a user document on first login.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(default)]
pub struct Profile {
    pub uid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Returns the single local user used when no profile is configured.
impl Default for Profile {
    fn default() -> Self {
        Self {
            uid: "local".to_string(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }
}

/// The values a user document is created with.
#[derive(Clone, PartialEq, Debug)]
pub struct UserSeed {
    pub profile: Profile,
    pub settings: Settings,
    pub stats: Stats,
}

/// The document persisted per user at the store.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    pub uid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub settings: Settings,
    pub stats: Stats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl FromRow for UserDocument {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get("uid")?,
            email: row.get("email")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            settings: row.get("settings")?,
            stats: row.get("stats")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            last_activity: row.get("last_activity")?,
        })
    }
}

impl FromSql for Settings {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        column_from_json(value)
    }
}

impl ToSql for Settings {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        column_to_json(self)
    }
}

impl FromSql for Stats {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        column_from_json(value)
    }
}

impl ToSql for Stats {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        column_to_json(self)
    }
}

/// Document fields are stored as JSON text columns.
fn column_from_json<T: DeserializeOwned>(value: ValueRef<'_>) -> FromSqlResult<T> {
    let text = value.as_str()?;
    serde_json::from_str(text).map_err(|e| FromSqlError::Other(e.into()))
}

fn column_to_json<T: Serialize>(value: &T) -> rusqlite::Result<ToSqlOutput<'static>> {
    let text = serde_json::to_string(value)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?;
    Ok(ToSqlOutput::from(text))
}
