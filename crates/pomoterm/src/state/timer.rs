use crate::state::model::*;
use tracing::debug;

/// Every n-th completed focus phase is followed by a long break.
pub const LONG_BREAK_INTERVAL: u32 = 4;

/// Map the timer's phase flags to the concrete [`Phase`].
///
/// A break is long when the focus phase that preceded it brought
/// `pomodoro_count` to a multiple of [`LONG_BREAK_INTERVAL`].
pub fn derive_phase(is_break: bool, pomodoro_count: u32) -> Phase {
    if !is_break {
        Phase::Work
    } else if pomodoro_count > 0 && pomodoro_count % LONG_BREAK_INTERVAL == 0 {
        Phase::LongBreak
    } else {
        Phase::ShortBreak
    }
}

/// Length in seconds of the phase described by `is_break` and
/// `pomodoro_count`, as configured in `settings`.
///
/// This is the one place a phase's duration is decided; every phase boundary
/// and settings change goes through it.
pub fn derive_phase_duration(settings: &Settings, is_break: bool, pomodoro_count: u32) -> u32 {
    derive_phase(is_break, pomodoro_count).duration(settings)
}

/// Outcome of [`TimerEngine::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Outcome of [`TimerEngine::pause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    NotRunning,
}

/// Outcome of a single [`TimerEngine::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The clock is not running; nothing changed.
    Idle,
    /// One second elapsed and time remains.
    Running,
    /// The countdown reached zero on this tick and the clock stopped.
    Elapsed,
}

/// The result of moving from one phase to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The phase that just finished.
    pub completed: Phase,
    /// The phase now loaded on the clock.
    pub next: Phase,
}

/// The work/break state machine.
///
/// The engine owns the [`TimerState`] and reads [`Settings`] from its caller
/// on every operation that needs a duration. It never fails: inconsistent
/// calls such as pausing a stopped clock are reported as no-op outcomes.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    state: TimerState,
}

impl TimerEngine {
    /// Build a stopped engine at the start of a focus phase.
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: TimerState::fresh(settings),
        }
    }

    /// Borrow the current countdown.
    pub fn state(&self) -> &TimerState {
        &self.state
    }

    /// The phase currently loaded on the clock.
    pub fn phase(&self) -> Phase {
        derive_phase(self.state.is_break, self.state.pomodoro_count)
    }

    /// Start the clock, reloading a fully drained countdown first.
    pub fn start(&mut self) -> StartOutcome {
        if self.state.is_running {
            return StartOutcome::AlreadyRunning;
        }
        if self.state.current_time == 0 {
            self.state.current_time = self.state.total_time;
        }
        self.state.is_running = true;
        debug!(phase = %self.phase(), remaining = self.state.current_time, "timer started");
        StartOutcome::Started
    }

    /// Stop the clock, keeping the remaining time.
    pub fn pause(&mut self) -> PauseOutcome {
        if !self.state.is_running {
            return PauseOutcome::NotRunning;
        }
        self.state.is_running = false;
        debug!(phase = %self.phase(), remaining = self.state.current_time, "timer paused");
        PauseOutcome::Paused
    }

    /// Stop the clock and reload the current phase at its configured length.
    pub fn reset(&mut self, settings: &Settings) {
        self.state.is_running = false;
        self.reload(settings);
        debug!(phase = %self.phase(), total = self.state.total_time, "timer reset");
    }

    /// Advance the clock by one second.
    ///
    /// Returns [`TickOutcome::Elapsed`] exactly once per phase, on the tick
    /// that drains the countdown; the clock is stopped at that point so no
    /// later tick can elapse the same phase again.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.state.is_running {
            return TickOutcome::Idle;
        }
        self.state.current_time = self.state.current_time.saturating_sub(1);
        if self.state.current_time == 0 {
            self.state.is_running = false;
            return TickOutcome::Elapsed;
        }
        TickOutcome::Running
    }

    /// Whether the current phase may be completed by hand.
    ///
    /// A phase that was never started and still shows its full duration
    /// cannot be completed.
    pub fn can_complete(&self) -> bool {
        self.state.is_running || self.state.current_time < self.state.total_time
    }

    /// Move to the phase that follows the current one.
    ///
    /// After focus the count of completed pomodoros goes up and a break is
    /// loaded (long on every [`LONG_BREAK_INTERVAL`]-th); after a break a focus
    /// phase is loaded. The new phase starts stopped at full length.
    pub fn advance(&mut self, settings: &Settings) -> Transition {
        let completed = self.phase();
        if self.state.is_break {
            self.state.is_break = false;
        } else {
            self.state.pomodoro_count += 1;
            self.state.is_break = true;
        }
        self.state.is_running = false;
        self.reload(settings);

        let transition = Transition {
            completed,
            next: self.phase(),
        };
        debug!(
            completed = %transition.completed,
            next = %transition.next,
            pomodoro_count = self.state.pomodoro_count,
            "phase transition"
        );
        transition
    }

    /// Re-derive the countdown after the user changed durations or the
    /// session name. Has no effect while the clock runs.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if !self.state.is_running {
            self.reload(settings);
        }
    }

    /// Re-derive the countdown after settings were replaced from elsewhere
    /// (a rollback or a pushed remote value). Only an idle clock whose phase
    /// length actually changed is reloaded. Returns whether it was.
    pub fn follow_settings(&mut self, settings: &Settings) -> bool {
        let total = derive_phase_duration(settings, self.state.is_break, self.state.pomodoro_count);
        if self.state.is_running || total == self.state.total_time {
            return false;
        }
        self.reload(settings);
        true
    }

    fn reload(&mut self, settings: &Settings) {
        let total = derive_phase_duration(settings, self.state.is_break, self.state.pomodoro_count);
        self.state.total_time = total;
        self.state.current_time = total;
    }
}
