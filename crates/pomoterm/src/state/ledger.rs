//! Statistics bookkeeping for completed and committed phases.
//!
//! Every function here is pure: it takes the current [`Stats`] and returns a
//! complete replacement value together with the [`SessionRecord`] it
//! produced. Callers hand the replacement to the sync controller, which is
//! what makes rollback-by-replacement possible.

use crate::state::model::*;
use chrono::{DateTime, Utc};

/// Round a number of seconds to the nearest whole minute.
pub fn round_minutes(secs: u32) -> u32 {
    secs.saturating_add(30) / 60
}

/// Record a completed phase of the given kind.
///
/// Focus phases bump the completion count, focus time and streak counters;
/// breaks only add a history entry. The streak is never reset here.
pub fn record(
    stats: &Stats,
    settings: &Settings,
    timer: &TimerState,
    kind: PhaseKind,
    now: DateTime<Utc>,
) -> (Stats, SessionRecord) {
    let record = SessionRecord {
        session_name: settings.session_name.clone(),
        is_break: kind == PhaseKind::Break,
        timestamp: now,
        duration_minutes: round_minutes(timer.total_time).min(RECORD_MINUTES_MAX),
        commit_message: None,
    };

    let mut next = stats.clone();
    if kind == PhaseKind::Work {
        next.completed_today = (next.completed_today + 1).min(COMPLETED_TODAY_MAX);
        next.total_focus_time = next
            .total_focus_time
            .saturating_add(round_minutes(settings.work_duration));
        next.current_streak += 1;
        next.longest_streak = next.longest_streak.max(next.current_streak);
    }
    push_history(&mut next.history, record.clone());
    (next, record)
}

/// Record a manual commit of the time spent so far in the current phase.
///
/// Counters are left untouched.
pub fn commit(
    stats: &Stats,
    settings: &Settings,
    timer: &TimerState,
    message: &str,
    now: DateTime<Utc>,
) -> (Stats, SessionRecord) {
    let record = SessionRecord {
        session_name: settings.session_name.clone(),
        is_break: timer.is_break,
        timestamp: now,
        duration_minutes: round_minutes(timer.elapsed()).min(RECORD_MINUTES_MAX),
        commit_message: Some(message.to_string()),
    };

    let mut next = stats.clone();
    push_history(&mut next.history, record.clone());
    (next, record)
}

/// Append `record`, evicting the oldest entries beyond [`HISTORY_LIMIT`].
fn push_history(history: &mut Vec<SessionRecord>, record: SessionRecord) {
    history.push(record);
    if history.len() > HISTORY_LIMIT {
        let excess = history.len() - HISTORY_LIMIT;
        history.drain(..excess);
    }
}
