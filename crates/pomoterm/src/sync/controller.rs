use crate::state::model::*;
use crate::sync::store::{DocumentChange, Store, Subscription};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The entity a persistence request wrote.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Entity {
    Settings,
    Stats,
    /// The store's session-record collection.
    History,
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settings => write!(f, "settings"),
            Self::Stats => write!(f, "stats"),
            Self::History => write!(f, "history"),
        }
    }
}

/// How a persistence request settled.
#[derive(Clone, PartialEq, Debug)]
pub enum SyncOutcome {
    /// The store accepted the value; the local value stays.
    Applied,
    /// The store rejected the value; the local value was restored to what it
    /// was immediately before the mutation.
    RolledBack(String),
    /// A secondary write failed. Nothing was restored.
    Warning(String),
}

/// Sent once per persistence request when it settles.
#[derive(Clone, PartialEq, Debug)]
pub struct SyncReport {
    pub entity: Entity,
    pub outcome: SyncOutcome,
}

/// One synced field of the user's document.
#[derive(Debug)]
struct Field<T> {
    value: Option<T>,
    /// Values written locally whose echo has not come back yet, oldest first.
    unechoed: VecDeque<T>,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self {
            value: None,
            unechoed: VecDeque::new(),
        }
    }
}

impl<T: Clone + PartialEq> Field<T> {
    /// Take an authoritative value and forget outstanding writes.
    fn reset(&mut self, value: &T) {
        self.value = Some(value.clone());
        self.unechoed.clear();
    }

    /// Apply a local write. Returns the value it replaced.
    fn write(&mut self, next: T) -> Option<T> {
        self.unechoed.push_back(next.clone());
        self.value.replace(next)
    }

    /// Restore `previous` after the store rejected `failed`.
    fn roll_back(&mut self, failed: &T, previous: Option<T>) {
        if let Some(index) = self.unechoed.iter().position(|value| value == failed) {
            self.unechoed.remove(index);
        }
        self.value = previous;
    }

    /// Take a value pushed by the store. Returns whether the local value
    /// changed.
    ///
    /// While local writes are unechoed, a pushed value matching none of them
    /// predates them and is ignored. A match drains the writes up to it; only
    /// the echo of the newest write is taken as the value.
    fn accept_remote(&mut self, remote: &T) -> bool {
        if !self.unechoed.is_empty() {
            let Some(index) = self.unechoed.iter().position(|value| value == remote) else {
                return false;
            };
            self.unechoed.drain(..=index);
            if !self.unechoed.is_empty() {
                return false;
            }
        }
        let changed = self.value.as_ref() != Some(remote);
        self.value = Some(remote.clone());
        changed
    }
}

/// The locally held copy of the user's document fields.
#[derive(Default, Debug)]
struct Replica {
    settings: Field<Settings>,
    stats: Field<Stats>,
    /// The most recent sync failure, cleared by the next success.
    sync_error: Option<String>,
}

/// Keeps local [`Settings`] and [`Stats`] consistent with a [`Store`].
///
/// Mutations are applied locally at once and persisted in a spawned task. A
/// rejected write restores the value held immediately before that mutation
/// and raises the sync error; an accepted one clears it. Each settled request
/// is reported on the channel returned by [`SyncController::new`].
///
/// Values pushed by the store's subscription replace local state wholesale,
/// so the local optimistic overlay never outlives the echo of its own write.
/// Pushes that predate a local write still waiting for its echo are ignored.
#[derive(Clone)]
pub struct SyncController {
    store: Arc<dyn Store>,
    uid: String,
    replica: Arc<Mutex<Replica>>,
    reports: mpsc::UnboundedSender<SyncReport>,
    in_flight: Arc<AtomicUsize>,
}

impl SyncController {
    /// Build a controller for `uid` along with the receiver of its reports.
    pub fn new(
        store: Arc<dyn Store>,
        uid: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncReport>) {
        let (reports, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            store,
            uid: uid.into(),
            replica: Arc::default(),
            reports,
            in_flight: Arc::default(),
        };
        (controller, receiver)
    }

    /// The user this controller syncs.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Load the user's document, creating it from `seed` on first login, and
    /// replace local state with it.
    pub async fn hydrate(&self, seed: &UserSeed) -> Result<UserDocument> {
        let document = match self.store.get_user_document(&self.uid).await? {
            Some(document) => document,
            None => {
                info!(uid = %self.uid, "first login, creating user document");
                self.store.create_user_document(&self.uid, seed).await?
            }
        };
        self.accept(&document);
        Ok(document)
    }

    /// Re-read the user's document and replace local state with it.
    ///
    /// A failure raises the sync error and leaves local state alone.
    pub async fn refresh(&self) -> Result<UserDocument> {
        let result = self
            .store
            .get_user_document(&self.uid)
            .await
            .and_then(|document| document.context("User document not found"));
        match result {
            Ok(document) => {
                self.accept(&document);
                Ok(document)
            }
            Err(err) => {
                self.replica().sync_error = Some(format!("{err:#}"));
                Err(err)
            }
        }
    }

    /// Follow pushed changes to the user's document.
    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe(&self.uid)
    }

    /// Apply a pushed change. Returns whether local state changed.
    pub fn accept_remote(&self, change: &DocumentChange) -> bool {
        match change {
            DocumentChange::Updated(document) => {
                let mut replica = self.replica();
                let settings = replica.settings.accept_remote(&document.settings);
                let stats = replica.stats.accept_remote(&document.stats);
                settings || stats
            }
            DocumentChange::Deleted => {
                debug!(uid = %self.uid, "user document deleted remotely");
                false
            }
        }
    }

    /// The current local settings.
    pub fn settings(&self) -> Result<Settings> {
        self.replica().settings.value.clone().context("No user is signed in")
    }

    /// The current local stats.
    pub fn stats(&self) -> Result<Stats> {
        self.replica().stats.value.clone().context("No user is signed in")
    }

    /// The outstanding sync error, if any.
    pub fn sync_error(&self) -> Option<String> {
        self.replica().sync_error.clone()
    }

    /// Number of persistence requests that have not settled yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Replace the settings optimistically and persist them.
    pub fn replace_settings(&self, next: Settings) {
        self.apply_with_sync(
            Entity::Settings,
            settings_slot,
            next,
            |store, uid, settings| async move { store.replace_settings(&uid, &settings).await },
        );
    }

    /// Replace the stats optimistically and persist them.
    pub fn replace_stats(&self, next: Stats) {
        self.apply_with_sync(
            Entity::Stats,
            stats_slot,
            next,
            |store, uid, stats| async move { store.replace_stats(&uid, &stats).await },
        );
    }

    /// Append a record to the store's session-record collection.
    ///
    /// This is a secondary write: the primary stats replacement already
    /// carries the record, so a failure is only reported as a warning.
    pub fn append_session_record(&self, record: SessionRecord) {
        let store = self.store.clone();
        let uid = self.uid.clone();
        self.spawn(Entity::History, async move {
            match store.append_session_record(&uid, &record).await {
                Ok(()) => SyncOutcome::Applied,
                Err(err) => {
                    warn!(uid = %uid, error = %format!("{err:#}"), "failed to append session record");
                    SyncOutcome::Warning(format!("{err:#}"))
                }
            }
        });
    }

    /// Delete the user's document at the store. Local state is untouched.
    pub async fn delete_remote(&self) -> Result<()> {
        self.store.delete_user_document(&self.uid).await
    }

    /// Forget local state, as on logout.
    pub fn clear(&self) {
        *self.replica() = Replica::default();
    }

    /// Apply `next` to the slot selected by `slot`, then persist it with
    /// `persist` in the background, restoring the previous value if the
    /// store rejects it.
    fn apply_with_sync<T, P, F>(
        &self,
        entity: Entity,
        slot: fn(&mut Replica) -> &mut Field<T>,
        next: T,
        persist: P,
    ) where
        T: Clone + PartialEq + Send + 'static,
        P: FnOnce(Arc<dyn Store>, String, T) -> F,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let previous = slot(&mut self.replica()).write(next.clone());
        let request = persist(self.store.clone(), self.uid.clone(), next.clone());

        let replica = self.replica.clone();
        self.spawn(entity, async move {
            match request.await {
                Ok(()) => {
                    replica
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .sync_error = None;
                    SyncOutcome::Applied
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(%entity, error = %message, "persistence failed, rolling back");
                    let mut replica = replica.lock().unwrap_or_else(PoisonError::into_inner);
                    slot(&mut replica).roll_back(&next, previous);
                    replica.sync_error = Some(message.clone());
                    SyncOutcome::RolledBack(message)
                }
            }
        });
    }

    /// Run a persistence request in the background and report its outcome.
    fn spawn<F>(&self, entity: Entity, request: F)
    where
        F: Future<Output = SyncOutcome> + Send + 'static,
    {
        let reports = self.reports.clone();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let outcome = request.await;
            debug!(%entity, ?outcome, "persistence settled");
            in_flight.fetch_sub(1, Ordering::SeqCst);
            // The receiver is gone only while shutting down.
            let _ = reports.send(SyncReport { entity, outcome });
        });
    }

    /// Replace both fields from an authoritative document.
    fn accept(&self, document: &UserDocument) {
        let mut replica = self.replica();
        replica.settings.reset(&document.settings);
        replica.stats.reset(&document.stats);
        replica.sync_error = None;
    }

    fn replica(&self) -> MutexGuard<'_, Replica> {
        self.replica.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn settings_slot(replica: &mut Replica) -> &mut Field<Settings> {
    &mut replica.settings
}

fn stats_slot(replica: &mut Replica) -> &mut Field<Stats> {
    &mut replica.stats
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    async fn setup() -> Result<(Arc<FlakyStore>, SyncController, mpsc::UnboundedReceiver<SyncReport>)> {
        let store = FlakyStore::new()?;
        let (controller, reports) = SyncController::new(store.clone(), "local");
        controller.hydrate(&seed()).await?;
        Ok((store, controller, reports))
    }

    #[tokio::test]
    async fn hydrate_creates_document_on_first_login() -> Result<()> {
        let (store, controller, _reports) = setup().await?;
        assert_eq!(controller.settings()?, Settings::default());
        assert!(store.get_user_document("local").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn replace_settings_applies_locally_before_persisting() -> Result<()> {
        let (_store, controller, mut reports) = setup().await?;
        let next = Settings {
            theme: Theme::Light,
            ..Settings::default()
        };
        controller.replace_settings(next.clone());
        assert_eq!(controller.settings()?, next);

        let report = reports.recv().await.context("missing report")?;
        assert_eq!(report.entity, Entity::Settings);
        assert_eq!(report.outcome, SyncOutcome::Applied);
        assert_eq!(controller.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_write_rolls_back_and_success_clears_error() -> Result<()> {
        let (store, controller, mut reports) = setup().await?;
        let before = controller.stats()?;

        store.set_offline(true);
        controller.replace_stats(Stats {
            completed_today: 9,
            ..before.clone()
        });
        let report = reports.recv().await.context("missing report")?;
        assert!(matches!(report.outcome, SyncOutcome::RolledBack(_)));
        assert_eq!(controller.stats()?, before);
        assert!(controller.sync_error().is_some());

        store.set_offline(false);
        let after = Stats {
            completed_today: 1,
            ..before
        };
        controller.replace_stats(after.clone());
        let report = reports.recv().await.context("missing report")?;
        assert_eq!(report.outcome, SyncOutcome::Applied);
        assert_eq!(controller.stats()?, after);
        assert!(controller.sync_error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_history_append_is_only_a_warning() -> Result<()> {
        let (store, controller, mut reports) = setup().await?;
        store.set_offline(true);
        controller.append_session_record(SessionRecord {
            session_name: "Focus Session".to_string(),
            is_break: false,
            timestamp: chrono::Utc::now(),
            duration_minutes: 25,
            commit_message: None,
        });
        let report = reports.recv().await.context("missing report")?;
        assert_eq!(report.entity, Entity::History);
        assert!(matches!(report.outcome, SyncOutcome::Warning(_)));
        assert!(controller.sync_error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn subscription_pushes_own_writes() -> Result<()> {
        let (_store, controller, mut reports) = setup().await?;
        let mut subscription = controller.subscribe();
        let next = Settings {
            sound_enabled: false,
            ..Settings::default()
        };
        controller.replace_settings(next.clone());
        reports.recv().await.context("missing report")?;

        match subscription.next().await.context("feed closed")? {
            DocumentChange::Updated(document) => assert_eq!(document.settings, next),
            DocumentChange::Deleted => panic!("unexpected deletion"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn accept_remote_replaces_optimistic_overlay() -> Result<()> {
        let (store, controller, _reports) = setup().await?;
        let document = store.get_user_document("local").await?.context("missing document")?;

        controller.clear();
        controller.accept_remote(&DocumentChange::Updated(document.clone()));
        assert_eq!(controller.settings()?, document.settings);
        assert!(!controller.accept_remote(&DocumentChange::Updated(document)));
        Ok(())
    }

    #[tokio::test]
    async fn echo_older_than_pending_write_is_ignored() -> Result<()> {
        let (_store, controller, mut reports) = setup().await?;
        let mut subscription = controller.subscribe();
        let first = Settings {
            work_duration: 3000,
            ..Settings::default()
        };
        let second = Settings {
            work_duration: 2400,
            ..Settings::default()
        };
        controller.replace_settings(first);
        reports.recv().await.context("missing report")?;
        controller.replace_settings(second.clone());
        reports.recv().await.context("missing report")?;

        let stale = subscription.next().await.context("feed closed")?;
        assert!(!controller.accept_remote(&stale));
        assert_eq!(controller.settings()?, second);

        let fresh = subscription.next().await.context("feed closed")?;
        assert!(!controller.accept_remote(&fresh));
        assert_eq!(controller.settings()?, second);
        Ok(())
    }

    #[tokio::test]
    async fn remote_change_applies_once_writes_are_echoed() -> Result<()> {
        let (store, controller, mut reports) = setup().await?;
        let mut subscription = controller.subscribe();
        controller.replace_settings(Settings {
            theme: Theme::Light,
            ..Settings::default()
        });
        reports.recv().await.context("missing report")?;
        let echo = subscription.next().await.context("feed closed")?;
        controller.accept_remote(&echo);

        let remote = Settings {
            sound_enabled: false,
            ..Settings::default()
        };
        store.replace_settings("local", &remote).await?;
        let change = subscription.next().await.context("feed closed")?;
        assert!(controller.accept_remote(&change));
        assert_eq!(controller.settings()?, remote);
        Ok(())
    }

    #[tokio::test]
    async fn rolled_back_write_expects_no_echo() -> Result<()> {
        let (store, controller, mut reports) = setup().await?;
        store.set_offline(true);
        controller.replace_stats(Stats {
            completed_today: 4,
            ..Stats::default()
        });
        reports.recv().await.context("missing report")?;
        store.set_offline(false);

        let remote = Stats {
            completed_today: 7,
            ..Stats::default()
        };
        store.replace_stats("local", &remote).await?;
        let document = store.get_user_document("local").await?.context("missing document")?;
        assert!(controller.accept_remote(&DocumentChange::Updated(document)));
        assert_eq!(controller.stats()?, remote);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_failure_raises_sync_error() -> Result<()> {
        let (store, controller, _reports) = setup().await?;
        store.set_offline(true);
        assert!(controller.refresh().await.is_err());
        assert!(controller.sync_error().is_some());

        store.set_offline(false);
        controller.refresh().await?;
        assert!(controller.sync_error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn clear_forgets_local_state() -> Result<()> {
        let (_store, controller, _reports) = setup().await?;
        controller.clear();
        assert!(controller.settings().is_err());
        assert!(controller.stats().is_err());
        Ok(())
    }
}
