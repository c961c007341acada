use crate::app::input::{self, CommandLine, InputError};
use crate::app::reply::*;
use crate::hook::run::{HookArgs, HookEvent, Runner};
use crate::state::ledger;
use crate::state::model::*;
use crate::state::timer::*;
use crate::sync::controller::{Entity, SyncController, SyncOutcome, SyncReport};
use crate::sync::store::DocumentChange;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Reported in place of any error a handler did not expect.
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

/// Tunables of the [`Interpreter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterOptions {
    /// How long logout and data reset wait before taking effect.
    pub action_delay: Duration,
    /// How long a `/reset-data` confirmation stays valid.
    pub reset_window: Duration,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            action_delay: Duration::from_millis(1500),
            reset_window: Duration::from_secs(30),
        }
    }
}

/// Issued by `/reset-data` and consumed by the very next command.
#[derive(Debug, Clone, Copy)]
struct ResetToken {
    issued_at: Instant,
}

impl ResetToken {
    fn issue() -> Self {
        Self {
            issued_at: Instant::now(),
        }
    }

    fn is_live(&self, window: Duration) -> bool {
        self.issued_at.elapsed() <= window
    }
}

/// The phase length changed by `/set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DurationTarget {
    Work,
    Break,
    Long,
}

impl DurationTarget {
    fn apply(self, settings: &mut Settings, secs: u32) {
        match self {
            Self::Work => settings.work_duration = secs,
            Self::Break => settings.break_duration = secs,
            Self::Long => settings.long_break_duration = secs,
        }
    }
}

impl Display for DurationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Work => write!(f, "Work"),
            Self::Break => write!(f, "Break"),
            Self::Long => write!(f, "Long break"),
        }
    }
}

impl TryFrom<&str> for DurationTarget {
    type Error = InputError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "work" => Ok(Self::Work),
            "break" => Ok(Self::Break),
            "long" => Ok(Self::Long),
            _ => Err(InputError::argument(format!(
                "Unknown duration '{}'. Use work, break or long",
                input::sanitize(value)
            ))),
        }
    }
}

/// Validate the arguments of `/set`.
fn parse_set(args: &[String]) -> std::result::Result<(DurationTarget, u32), InputError> {
    let [target, minutes] = args else {
        return Err(InputError::argument("Usage: /set {work|break|long} <minutes>"));
    };
    let target = DurationTarget::try_from(target.as_str())?;
    let minutes = input::parse_minutes(minutes)?;
    Ok((target, minutes))
}

/// Validate the arguments of `/theme`; no argument toggles.
fn parse_theme(args: &[String], current: Theme) -> std::result::Result<Theme, InputError> {
    match args {
        [] => Ok(current.toggled()),
        [token] => Theme::try_from(token.as_str()).map_err(|_| {
            InputError::argument(format!(
                "Unknown theme '{}'. Use light or dark",
                input::sanitize(token)
            ))
        }),
        _ => Err(InputError::argument("Usage: /theme [light|dark]")),
    }
}

/// Validate the arguments of `/sound`; no argument toggles.
fn parse_sound(args: &[String], current: bool) -> std::result::Result<bool, InputError> {
    match args {
        [] => Ok(!current),
        [token] => match token.to_ascii_lowercase().as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            _ => Err(InputError::argument(format!(
                "Unknown sound setting '{}'. Use on or off",
                input::sanitize(token)
            ))),
        },
        _ => Err(InputError::argument("Usage: /sound [on|off]")),
    }
}

/// Turn a handler outcome into a reply, hiding unexpected errors.
fn settle(result: Result<Reply>) -> Reply {
    result.unwrap_or_else(|err| {
        error!(error = %format!("{err:#}"), "command failed");
        Reply::failure(UNEXPECTED_ERROR)
    })
}

/// Interprets command lines against the timer and the synced user state.
///
/// The interpreter owns the [`TimerEngine`] and reads [`Settings`] and
/// [`Stats`] through the [`SyncController`]; every mutation of those goes
/// out as a full replacement value. Besides commands it reacts to clock
/// ticks, settled persistence requests and pushed document changes, so the
/// shell can route everything through one place.
pub struct Interpreter {
    sync: SyncController,
    engine: TimerEngine,
    runner: Option<Runner>,
    /// Recreates the user document after a data reset.
    seed: UserSeed,
    options: InterpreterOptions,
    pending_reset: Option<ResetToken>,
}

impl Interpreter {
    /// Build an interpreter over a hydrated controller.
    pub fn new(
        sync: SyncController,
        seed: UserSeed,
        runner: Option<Runner>,
        options: InterpreterOptions,
    ) -> Result<Self> {
        let settings = sync.settings()?;
        Ok(Self {
            engine: TimerEngine::new(&settings),
            sync,
            runner,
            seed,
            options,
            pending_reset: None,
        })
    }

    /// The controller holding the synced user state.
    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    #[cfg(test)]
    pub fn engine(&self) -> &TimerEngine {
        &self.engine
    }

    /// Run one command line.
    ///
    /// Any pending reset confirmation is consumed here, whatever the line
    /// turns out to be. Input errors come back as failed replies and
    /// unexpected errors as [`UNEXPECTED_ERROR`]; neither leaves state half
    /// changed.
    pub async fn execute(&mut self, line: &str) -> Reply {
        let pending_reset = self.pending_reset.take();
        let command = match input::parse(line) {
            Ok(command) => command,
            Err(err) => {
                debug!(%err, "rejected command line");
                return Reply::from(err);
            }
        };

        debug!(command = %command.name, args = command.args.len(), "dispatching command");
        let mut reply = settle(self.dispatch(&command, pending_reset).await);
        if reply.result.success {
            if let Some(err) = self.sync.sync_error() {
                reply.events.push(OutputEvent::Warning(format!("Sync error: {err}")));
            }
        }
        reply
    }

    /// Advance the clock by one second. Returns a reply when a phase ended.
    pub fn tick(&mut self) -> Option<Reply> {
        match self.engine.tick() {
            TickOutcome::Elapsed => Some(settle(self.complete_phase())),
            TickOutcome::Idle | TickOutcome::Running => None,
        }
    }

    /// Run a deferred action whose delay has passed.
    pub async fn run_deferred(&mut self, action: DeferredAction) -> Reply {
        match action {
            DeferredAction::Logout => self.logout_now(),
            DeferredAction::ResetData => settle(self.reset_data_now().await),
        }
    }

    /// React to a settled persistence request.
    pub fn on_sync_report(&mut self, report: &SyncReport) -> Option<Reply> {
        match &report.outcome {
            SyncOutcome::Applied => None,
            SyncOutcome::RolledBack(err) => {
                let mut reply = Reply::failure(format!(
                    "Could not save {}: {err}. The change was rolled back.",
                    report.entity
                ));
                if report.entity == Entity::Settings {
                    if let Ok(Some(clock)) = self.follow_settings() {
                        reply = reply.with_event(clock);
                    }
                }
                Some(reply)
            }
            SyncOutcome::Warning(err) => Some(Reply::warning(format!(
                "Could not save {}: {err}",
                report.entity
            ))),
        }
    }

    /// React to a change pushed by the store.
    pub fn on_remote_change(&mut self, change: &DocumentChange) -> Option<Reply> {
        if !self.sync.accept_remote(change) {
            return None;
        }
        match self.follow_settings() {
            Ok(Some(clock)) => {
                let message = "Settings updated from the store";
                Some(
                    Reply::new(CommandResult::ok(message))
                        .with_event(OutputEvent::Info(message.to_string()))
                        .with_event(clock),
                )
            }
            _ => None,
        }
    }

    async fn dispatch(&mut self, command: &CommandLine, pending_reset: Option<ResetToken>) -> Result<Reply> {
        match command.name.as_str() {
            "play" => self.play(),
            "pause" => self.pause(),
            "reset" => self.reset(),
            "complete" => self.complete(),
            "commit" => self.commit(command),
            "set" => self.set(command),
            "session" => self.session(command),
            "theme" => self.theme(command),
            "sound" => self.sound(command),
            "stats" => self.stats().await,
            "sync" => self.sync_now().await,
            "help" => Ok(Reply::new(CommandResult::ok("Available commands"))
                .with_event(OutputEvent::Help(COMMANDS.to_vec()))),
            "clear" => Ok(Reply::new(CommandResult::ok("Screen cleared")).with_event(OutputEvent::Clear)),
            "logout" => Ok(Reply::success("Logging out...")
                .with_deferred(DeferredAction::Logout, self.options.action_delay)),
            "reset-data" => Ok(self.reset_data()),
            "confirm-reset" => Ok(self.confirm_reset(pending_reset)),
            _ => Ok(Reply::failure(format!(
                "Unknown command: /{}. Type /help for available commands.",
                command.token
            ))),
        }
    }

    fn play(&mut self) -> Result<Reply> {
        match self.engine.start() {
            StartOutcome::Started => {
                let message = format!("{} started", self.engine.phase());
                Ok(Reply::success(message).with_event(self.clock()?))
            }
            StartOutcome::AlreadyRunning => Ok(Reply::warning("Timer is already running")),
        }
    }

    fn pause(&mut self) -> Result<Reply> {
        match self.engine.pause() {
            PauseOutcome::Paused => Ok(Reply::success("Timer paused").with_event(self.clock()?)),
            PauseOutcome::NotRunning => Ok(Reply::warning("Timer is not running")),
        }
    }

    fn reset(&mut self) -> Result<Reply> {
        let settings = self.sync.settings()?;
        self.engine.reset(&settings);
        Ok(Reply::success("Timer reset").with_event(self.clock()?))
    }

    fn complete(&mut self) -> Result<Reply> {
        if !self.engine.can_complete() {
            return Ok(Reply::warning("Start the timer before completing this phase"));
        }
        self.complete_phase()
    }

    /// Record the current phase, move to the next one and rename the
    /// session after it.
    fn complete_phase(&mut self) -> Result<Reply> {
        let settings = self.sync.settings()?;
        let stats = self.sync.stats()?;
        let kind = self.engine.phase().kind();
        let (stats, record) = ledger::record(&stats, &settings, self.engine.state(), kind, Utc::now());

        let transition = self.engine.advance(&settings);
        let settings = Settings {
            session_name: transition.next.label().to_string(),
            ..settings
        };
        let sound_enabled = settings.sound_enabled;

        self.sync.replace_stats(stats.clone());
        self.sync.append_session_record(record.clone());
        self.sync.replace_settings(settings);
        self.notify(HookEvent::completed(kind), record, stats);

        let mut reply = Reply::success(format!(
            "{} complete. Up next: {}",
            transition.completed, transition.next
        ));
        if sound_enabled {
            reply = reply.with_event(OutputEvent::Bell);
        }
        Ok(reply.with_event(self.clock()?))
    }

    fn commit(&mut self, command: &CommandLine) -> Result<Reply> {
        let message = match input::sanitize_text(&command.text(), COMMIT_MESSAGE_MAX_LEN, "Commit message") {
            Ok(message) => message,
            Err(err) => return Ok(err.into()),
        };
        let settings = self.sync.settings()?;
        let stats = self.sync.stats()?;
        let (stats, record) = ledger::commit(&stats, &settings, self.engine.state(), &message, Utc::now());
        let minutes = record.duration_minutes;

        self.sync.replace_stats(stats.clone());
        self.sync.append_session_record(record.clone());
        self.notify(HookEvent::Commit, record, stats);

        Ok(Reply::success(format!("Committed {minutes} min: {message}")))
    }

    fn set(&mut self, command: &CommandLine) -> Result<Reply> {
        let (target, minutes) = match parse_set(&command.args) {
            Ok(parsed) => parsed,
            Err(err) => return Ok(err.into()),
        };
        let mut settings = self.sync.settings()?;
        target.apply(&mut settings, minutes * 60);
        self.engine.apply_settings(&settings);
        self.sync.replace_settings(settings);

        let message = format!("{target} duration set to {minutes} minutes");
        Ok(Reply::success(message).with_event(self.clock()?))
    }

    fn session(&mut self, command: &CommandLine) -> Result<Reply> {
        let name = match input::sanitize_text(&command.text(), SESSION_NAME_MAX_LEN, "Session name") {
            Ok(name) => name,
            Err(err) => return Ok(err.into()),
        };
        let settings = Settings {
            session_name: name.clone(),
            ..self.sync.settings()?
        };
        // A renamed session always starts over.
        self.engine.apply_settings(&settings);
        self.sync.replace_settings(settings);

        Ok(Reply::success(format!("Session renamed to {name}")).with_event(self.clock()?))
    }

    fn theme(&mut self, command: &CommandLine) -> Result<Reply> {
        let settings = self.sync.settings()?;
        let theme = match parse_theme(&command.args, settings.theme) {
            Ok(theme) => theme,
            Err(err) => return Ok(err.into()),
        };
        self.sync.replace_settings(Settings { theme, ..settings });
        Ok(Reply::success(format!("Theme set to {theme}")))
    }

    fn sound(&mut self, command: &CommandLine) -> Result<Reply> {
        let settings = self.sync.settings()?;
        let sound_enabled = match parse_sound(&command.args, settings.sound_enabled) {
            Ok(sound_enabled) => sound_enabled,
            Err(err) => return Ok(err.into()),
        };
        self.sync.replace_settings(Settings {
            sound_enabled,
            ..settings
        });
        let state = if sound_enabled { "on" } else { "off" };
        Ok(Reply::success(format!("Sound turned {state}")))
    }

    /// Show stats, reloading them from the store first. A failed reload
    /// shows the local copy; the sync error is reported alongside.
    async fn stats(&mut self) -> Result<Reply> {
        if self.sync.refresh().await.is_ok() {
            self.follow_settings()?;
        }
        let stats = self.sync.stats()?;
        Ok(Reply::new(CommandResult::ok("Statistics")).with_event(OutputEvent::Stats(StatsView::from(&stats))))
    }

    async fn sync_now(&mut self) -> Result<Reply> {
        match self.sync.refresh().await {
            Ok(_) => {
                let reply = Reply::success("Synced with the store");
                Ok(match self.follow_settings()? {
                    Some(clock) => reply.with_event(clock),
                    None => reply,
                })
            }
            Err(err) => Ok(Reply::failure(format!("Sync failed: {err:#}"))),
        }
    }

    fn reset_data(&mut self) -> Reply {
        self.pending_reset = Some(ResetToken::issue());
        Reply::warning(format!(
            "This permanently deletes your settings, stats and session history. \
             Type /confirm-reset within {} to continue.",
            humantime::format_duration(self.options.reset_window)
        ))
    }

    fn confirm_reset(&mut self, token: Option<ResetToken>) -> Reply {
        match token {
            Some(token) if token.is_live(self.options.reset_window) => Reply::warning("Resetting all data...")
                .with_deferred(DeferredAction::ResetData, self.options.action_delay),
            Some(_) => InputError::argument("Reset confirmation expired. Run /reset-data again.").into(),
            None => InputError::argument("No reset is pending. Run /reset-data first.").into(),
        }
    }

    fn logout_now(&mut self) -> Reply {
        self.sync.clear();
        self.engine = TimerEngine::new(&Settings::default());
        self.pending_reset = None;
        info!(uid = %self.sync.uid(), "logged out");
        Reply::success("Logged out")
    }

    /// Delete the user document, then start over from the seed.
    async fn reset_data_now(&mut self) -> Result<Reply> {
        if let Err(err) = self.sync.delete_remote().await {
            return Ok(Reply::failure(format!("Could not reset data: {err:#}")));
        }
        info!(uid = %self.sync.uid(), "user data deleted");

        let document = self
            .sync
            .hydrate(&self.seed)
            .await
            .context("Failed to recreate user document after reset")?;
        self.engine = TimerEngine::new(&document.settings);
        Ok(Reply::success("All data has been reset").with_event(self.clock()?))
    }

    /// Re-derive an idle clock from the current settings. Returns the new
    /// clock if it changed.
    fn follow_settings(&mut self) -> Result<Option<OutputEvent>> {
        let settings = self.sync.settings()?;
        if self.engine.follow_settings(&settings) {
            return Ok(Some(self.clock()?));
        }
        Ok(None)
    }

    fn clock(&self) -> Result<OutputEvent> {
        let settings = self.sync.settings()?;
        Ok(OutputEvent::Clock(ClockView::new(
            self.engine.state(),
            self.engine.phase(),
            &settings,
        )))
    }

    fn notify(&self, event: HookEvent, record: SessionRecord, stats: Stats) {
        if let Some(runner) = &self.runner {
            runner.notify(&HookArgs { event, record, stats });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::controller::testing::*;
    use crate::sync::store::Store;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn setup_with(
        options: InterpreterOptions,
    ) -> Result<(Arc<FlakyStore>, Interpreter, mpsc::UnboundedReceiver<SyncReport>)> {
        let store = FlakyStore::new()?;
        let (sync, reports) = SyncController::new(store.clone(), "local");
        sync.hydrate(&seed()).await?;
        let interpreter = Interpreter::new(sync, seed(), None, options)?;
        Ok((store, interpreter, reports))
    }

    async fn setup() -> Result<(Arc<FlakyStore>, Interpreter, mpsc::UnboundedReceiver<SyncReport>)> {
        setup_with(InterpreterOptions::default()).await
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    // --- argument parsing ---

    #[test]
    fn parse_set_requires_exactly_two_arguments() {
        assert!(parse_set(&args(&["work"])).is_err());
        assert!(parse_set(&args(&["work", "5", "6"])).is_err());
        assert_eq!(parse_set(&args(&["LONG", "20"])), Ok((DurationTarget::Long, 20)));
    }

    #[test]
    fn parse_set_rejects_unknown_target_and_bad_minutes() {
        assert!(parse_set(&args(&["nap", "5"])).is_err());
        assert!(parse_set(&args(&["work", "0"])).is_err());
        assert!(parse_set(&args(&["work", "1441"])).is_err());
    }

    #[test]
    fn parse_theme_toggles_without_argument() {
        assert_eq!(parse_theme(&[], Theme::Dark), Ok(Theme::Light));
        assert_eq!(parse_theme(&args(&["DARK"]), Theme::Dark), Ok(Theme::Dark));
        assert!(parse_theme(&args(&["blue"]), Theme::Dark).is_err());
        assert!(parse_theme(&args(&["light", "dark"]), Theme::Dark).is_err());
    }

    #[test]
    fn parse_sound_toggles_without_argument() {
        assert_eq!(parse_sound(&[], true), Ok(false));
        assert_eq!(parse_sound(&args(&["on"]), false), Ok(true));
        assert!(parse_sound(&args(&["loud"]), true).is_err());
    }

    // --- timer commands ---

    #[tokio::test]
    async fn full_work_phase_completes_on_last_tick() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        assert!(interpreter.execute("/play").await.result.success);

        let replies: Vec<_> = (0..1500).filter_map(|_| interpreter.tick()).collect();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].events.contains(&OutputEvent::Bell));

        let state = interpreter.engine().state();
        assert!(!state.is_running);
        assert!(state.is_break);
        assert_eq!(state.pomodoro_count, 1);
        assert_eq!(state.total_time, 300);

        let stats = interpreter.sync().stats()?;
        assert_eq!(stats.completed_today, 1);
        assert_eq!(stats.history.len(), 1);
        assert!(!stats.history[0].is_break);
        assert_eq!(interpreter.sync().settings()?.session_name, "Short Break");
        Ok(())
    }

    #[tokio::test]
    async fn set_break_then_reset_on_break_phase() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        assert!(interpreter.execute("/set break 10").await.result.success);
        interpreter.execute("/play").await;
        interpreter.execute("/complete").await;
        assert!(interpreter.engine().state().is_break);

        interpreter.execute("/reset").await;
        let state = interpreter.engine().state();
        assert_eq!(state.current_time, 600);
        assert_eq!(state.total_time, 600);
        Ok(())
    }

    #[tokio::test]
    async fn set_applies_to_idle_clock() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        interpreter.execute("/set work 50").await;
        let state = interpreter.engine().state();
        assert_eq!(state.total_time, 3000);
        assert_eq!(state.current_time, 3000);
        assert_eq!(interpreter.sync().settings()?.work_duration, 3000);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_set_changes_nothing() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        for line in ["/set work 0", "/set work", "/set nap 5", "/set work 5 6", "/set work abc"] {
            let reply = interpreter.execute(line).await;
            assert!(!reply.result.success, "{line} succeeded");
        }
        assert_eq!(interpreter.sync().settings()?, Settings::default());
        Ok(())
    }

    #[tokio::test]
    async fn fourth_work_phase_leads_to_long_break() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        for round in 1..=4 {
            interpreter.execute("/play").await;
            interpreter.execute("/complete").await;
            if round < 4 {
                assert_eq!(interpreter.engine().phase(), Phase::ShortBreak);
                interpreter.execute("/play").await;
                interpreter.execute("/complete").await;
            }
        }
        assert_eq!(interpreter.engine().phase(), Phase::LongBreak);
        assert_eq!(interpreter.engine().state().total_time, 900);
        assert_eq!(interpreter.sync().stats()?.completed_today, 4);
        Ok(())
    }

    #[tokio::test]
    async fn complete_untouched_phase_is_a_warning() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        let reply = interpreter.execute("/complete").await;
        assert!(reply.result.success);
        assert!(matches!(reply.events[0], OutputEvent::Warning(_)));
        assert_eq!(interpreter.sync().stats()?, Stats::default());
        Ok(())
    }

    #[tokio::test]
    async fn pause_and_play_report_no_ops() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        let reply = interpreter.execute("/pause").await;
        assert_eq!(reply.result.message.as_deref(), Some("Timer is not running"));

        interpreter.execute("/play").await;
        let reply = interpreter.execute("/PLAY").await;
        assert_eq!(reply.result.message.as_deref(), Some("Timer is already running"));
        Ok(())
    }

    #[tokio::test]
    async fn session_rename_restarts_idle_clock() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        interpreter.execute("/play").await;
        for _ in 0..10 {
            interpreter.tick();
        }
        interpreter.execute("/pause").await;

        let reply = interpreter.execute(r#"/session "Deep work""#).await;
        assert!(reply.result.success);
        let state = interpreter.engine().state();
        assert_eq!(state.current_time, state.total_time);
        assert_eq!(interpreter.sync().settings()?.session_name, "Deep work");
        Ok(())
    }

    // --- ledger commands ---

    #[tokio::test]
    async fn commit_records_elapsed_minutes() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        interpreter.execute("/play").await;
        for _ in 0..300 {
            interpreter.tick();
        }

        let reply = interpreter.execute(r#"/commit "did X""#).await;
        assert_eq!(reply.result.message.as_deref(), Some("Committed 5 min: did X"));

        let stats = interpreter.sync().stats()?;
        assert_eq!(stats.completed_today, 0);
        let record = stats.history.last().context("missing record")?;
        assert_eq!(record.duration_minutes, 5);
        assert_eq!(record.commit_message.as_deref(), Some("did X"));
        Ok(())
    }

    #[tokio::test]
    async fn commit_requires_a_message() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        let reply = interpreter.execute("/commit").await;
        assert_eq!(reply.result.error.as_deref(), Some("Commit message cannot be empty"));
        Ok(())
    }

    #[tokio::test]
    async fn stats_shows_refreshed_values() -> Result<()> {
        let (store, mut interpreter, _reports) = setup().await?;
        let remote = Stats {
            completed_today: 9,
            ..Stats::default()
        };
        store.replace_stats("local", &remote).await?;

        let reply = interpreter.execute("/stats").await;
        let view = reply
            .events
            .iter()
            .find_map(|event| match event {
                OutputEvent::Stats(view) => Some(view.clone()),
                _ => None,
            })
            .context("missing stats event")?;
        assert_eq!(view.completed_today, 9);
        Ok(())
    }

    // --- destructive commands ---

    #[tokio::test]
    async fn reset_data_alone_deletes_nothing() -> Result<()> {
        let (store, mut interpreter, _reports) = setup().await?;
        let reply = interpreter.execute("/reset-data").await;
        assert!(reply.result.success);
        assert!(reply.deferred.is_none());
        assert_eq!(store.deletions.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn confirm_reset_after_reset_data_deletes() -> Result<()> {
        let (store, mut interpreter, _reports) = setup().await?;
        interpreter.execute("/play").await;
        interpreter.execute("/complete").await;

        interpreter.execute("/reset-data").await;
        let reply = interpreter.execute("/confirm-reset").await;
        let deferred = reply.deferred.context("missing deferred action")?;
        assert_eq!(deferred.action, DeferredAction::ResetData);
        assert_eq!(store.deletions.load(Ordering::SeqCst), 0);

        let reply = interpreter.run_deferred(deferred.action).await;
        assert!(reply.result.success);
        assert_eq!(store.deletions.load(Ordering::SeqCst), 1);
        assert_eq!(interpreter.sync().stats()?, Stats::default());
        assert!(!interpreter.engine().state().is_break);
        Ok(())
    }

    #[tokio::test]
    async fn any_other_command_cancels_pending_reset() -> Result<()> {
        let (store, mut interpreter, _reports) = setup().await?;
        interpreter.execute("/reset-data").await;
        interpreter.execute("/pause").await;

        let reply = interpreter.execute("/confirm-reset").await;
        assert!(!reply.result.success);
        assert!(reply.deferred.is_none());

        interpreter.execute("/reset-data").await;
        interpreter.execute("not a command").await;
        assert!(!interpreter.execute("/confirm-reset").await.result.success);
        assert_eq!(store.deletions.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_reset_confirmation_is_rejected() -> Result<()> {
        let options = InterpreterOptions {
            reset_window: Duration::ZERO,
            ..InterpreterOptions::default()
        };
        let (_store, mut interpreter, _reports) = setup_with(options).await?;
        interpreter.execute("/reset-data").await;
        std::thread::sleep(Duration::from_millis(5));

        let reply = interpreter.execute("/confirm-reset").await;
        assert_eq!(
            reply.result.error.as_deref(),
            Some("Reset confirmation expired. Run /reset-data again.")
        );
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_deferred_and_clears_state() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        let reply = interpreter.execute("/logout").await;
        let deferred = reply.deferred.context("missing deferred action")?;
        assert_eq!(deferred.action, DeferredAction::Logout);
        assert_eq!(deferred.delay, Duration::from_millis(1500));
        assert!(interpreter.sync().settings().is_ok());

        interpreter.run_deferred(deferred.action).await;
        assert!(interpreter.sync().settings().is_err());

        let reply = interpreter.execute("/reset").await;
        assert_eq!(reply.result.error.as_deref(), Some(UNEXPECTED_ERROR));
        Ok(())
    }

    // --- sync ---

    #[tokio::test]
    async fn rejected_settings_roll_back_and_surface_error() -> Result<()> {
        let (store, mut interpreter, mut reports) = setup().await?;
        store.set_offline(true);

        interpreter.execute("/set work 50").await;
        assert_eq!(interpreter.engine().state().total_time, 3000);

        let report = reports.recv().await.context("missing report")?;
        assert!(matches!(report.outcome, SyncOutcome::RolledBack(_)));
        let reply = interpreter.on_sync_report(&report).context("missing reply")?;
        assert!(!reply.result.success);
        assert_eq!(interpreter.sync().settings()?.work_duration, 1500);
        assert_eq!(interpreter.engine().state().total_time, 1500);

        let reply = interpreter.execute("/help").await;
        assert!(matches!(reply.events.last(), Some(OutputEvent::Warning(_))));

        store.set_offline(false);
        interpreter.execute("/sound off").await;
        let report = reports.recv().await.context("missing report")?;
        assert_eq!(report.outcome, SyncOutcome::Applied);
        assert!(interpreter.sync().sync_error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn remote_duration_change_reloads_idle_clock() -> Result<()> {
        let (store, mut interpreter, _reports) = setup().await?;
        let settings = Settings {
            work_duration: 3000,
            ..Settings::default()
        };
        store.replace_settings("local", &settings).await?;
        let document = store.get_user_document("local").await?.context("missing document")?;

        let reply = interpreter.on_remote_change(&DocumentChange::Updated(document.clone()));
        assert!(reply.is_some());
        assert_eq!(interpreter.engine().state().total_time, 3000);

        // The same document again changes nothing.
        assert!(interpreter.on_remote_change(&DocumentChange::Updated(document)).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn late_echo_of_older_set_keeps_paused_clock() -> Result<()> {
        let (_store, mut interpreter, mut reports) = setup().await?;
        let mut subscription = interpreter.sync().subscribe();

        interpreter.execute("/set work 50").await;
        reports.recv().await.context("missing report")?;
        interpreter.execute("/set work 40").await;
        reports.recv().await.context("missing report")?;

        interpreter.execute("/play").await;
        for _ in 0..600 {
            interpreter.tick();
        }
        interpreter.execute("/pause").await;
        let state = interpreter.engine().state();
        assert_eq!((state.current_time, state.total_time), (1800, 2400));

        let stale = subscription.next().await.context("feed closed")?;
        assert!(interpreter.on_remote_change(&stale).is_none());
        let fresh = subscription.next().await.context("feed closed")?;
        assert!(interpreter.on_remote_change(&fresh).is_none());

        let state = interpreter.engine().state();
        assert_eq!((state.current_time, state.total_time), (1800, 2400));
        assert_eq!(interpreter.sync().settings()?.work_duration, 2400);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_command_names_the_token() -> Result<()> {
        let (_store, mut interpreter, _reports) = setup().await?;
        let reply = interpreter.execute("/Dance now").await;
        assert_eq!(
            reply.result.error.as_deref(),
            Some("Unknown command: /Dance. Type /help for available commands.")
        );
        Ok(())
    }
}
