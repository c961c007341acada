use crate::state::model::*;
use crate::state::query::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of the change feed shared by all subscriptions.
const CHANGE_FEED_CAPACITY: usize = 64;

/// A change to a user document, as pushed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentChange {
    /// The document was created or one of its fields replaced.
    Updated(UserDocument),
    /// The document and its session records were deleted.
    Deleted,
}

/// One entry on the store-wide change feed.
#[derive(Clone, Debug)]
struct StoreChange {
    uid: String,
    change: DocumentChange,
}

/// A live view of one user's document changes.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    uid: String,
    receiver: broadcast::Receiver<StoreChange>,
}

impl Subscription {
    /// Wait for the next change to the subscribed document.
    ///
    /// Returns `None` once the store has gone away. Changes lost to a slow
    /// reader are skipped; the next change carries the full document anyway.
    pub async fn next(&mut self) -> Option<DocumentChange> {
        loop {
            match self.receiver.recv().await {
                Ok(StoreChange { uid, change }) if uid == self.uid => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscription lagged behind the change feed");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The remote persistence service: one document per user plus a bounded
/// collection of session records.
///
/// Every call may fail; callers decide whether a failure rolls anything back.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the user document, or `None` on first login.
    async fn get_user_document(&self, uid: &str) -> Result<Option<UserDocument>>;

    /// Create the user document from `seed` and return it.
    async fn create_user_document(&self, uid: &str, seed: &UserSeed) -> Result<UserDocument>;

    /// Replace the settings field wholesale.
    async fn replace_settings(&self, uid: &str, settings: &Settings) -> Result<()>;

    /// Replace the stats field wholesale.
    async fn replace_stats(&self, uid: &str, stats: &Stats) -> Result<()>;

    /// Add a record to the user's session-record collection.
    async fn append_session_record(&self, uid: &str, record: &SessionRecord) -> Result<()>;

    /// Delete the document and all of its session records atomically.
    async fn delete_user_document(&self, uid: &str) -> Result<()>;

    /// Follow changes to the user's document.
    fn subscribe(&self, uid: &str) -> Subscription;
}

/// A [`Store`] backed by a SQLite [`Database`].
///
/// Calls run to completion under a mutex; the change feed is a broadcast
/// channel fed after every successful document write.
pub struct SqliteStore {
    database: Mutex<Database>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    /// Wrap a migrated database.
    pub fn new(database: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            database: Mutex::new(database),
            changes,
        }
    }

    fn database(&self) -> MutexGuard<'_, Database> {
        self.database.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, uid: &str, change: DocumentChange) {
        // No subscribers is not an error.
        let _ = self.changes.send(StoreChange {
            uid: uid.to_string(),
            change,
        });
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_user_document(&self, uid: &str) -> Result<Option<UserDocument>> {
        let database = self.database();
        let querier = Querier::new(database.connection());
        querier.get_user(&UserIdArgs { uid })
    }

    async fn create_user_document(&self, uid: &str, seed: &UserSeed) -> Result<UserDocument> {
        let now = Utc::now();
        let document = UserDocument {
            uid: uid.to_string(),
            email: seed.profile.email.clone(),
            first_name: seed.profile.first_name.clone(),
            last_name: seed.profile.last_name.clone(),
            settings: seed.settings.clone(),
            stats: seed.stats.clone(),
            created_at: now,
            updated_at: now,
            last_activity: now,
        };

        let document = {
            let database = self.database();
            let querier = Querier::new(database.connection());
            querier
                .insert_user(&InsertUserArgs {
                    document: &document,
                })
                .with_context(|| format!("Failed to create user document {uid}"))?
        };
        info!(uid, "user document created");
        self.publish(uid, DocumentChange::Updated(document.clone()));
        Ok(document)
    }

    async fn replace_settings(&self, uid: &str, settings: &Settings) -> Result<()> {
        let document = {
            let database = self.database();
            let querier = Querier::new(database.connection());
            querier
                .update_user_settings(&UpdateUserSettingsArgs {
                    uid,
                    settings,
                    updated_at: Utc::now(),
                })
                .with_context(|| format!("Failed to replace settings of {uid}"))?
        };
        self.publish(uid, DocumentChange::Updated(document));
        Ok(())
    }

    async fn replace_stats(&self, uid: &str, stats: &Stats) -> Result<()> {
        let document = {
            let database = self.database();
            let querier = Querier::new(database.connection());
            querier
                .update_user_stats(&UpdateUserStatsArgs {
                    uid,
                    stats,
                    updated_at: Utc::now(),
                })
                .with_context(|| format!("Failed to replace stats of {uid}"))?
        };
        self.publish(uid, DocumentChange::Updated(document));
        Ok(())
    }

    async fn append_session_record(&self, uid: &str, record: &SessionRecord) -> Result<()> {
        let mut database = self.database();
        let tx = database.transaction()?;
        let querier = Querier::new(&tx);
        querier
            .insert_session_record(&InsertSessionRecordArgs {
                session_record_id: Uuid::now_v7(),
                uid,
                record,
            })
            .with_context(|| format!("Failed to append session record for {uid}"))?;
        querier.trim_session_records(&TrimSessionRecordsArgs {
            uid,
            limit: HISTORY_LIMIT as u32,
        })?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(())
    }

    async fn delete_user_document(&self, uid: &str) -> Result<()> {
        {
            let mut database = self.database();
            let tx = database.transaction()?;
            let querier = Querier::new(&tx);
            querier.delete_session_records(&UserIdArgs { uid })?;
            querier.delete_user(&UserIdArgs { uid })?;
            tx.commit().context("Failed to commit transaction")?;
        }
        info!(uid, "user document deleted");
        self.publish(uid, DocumentChange::Deleted);
        Ok(())
    }

    fn subscribe(&self, uid: &str) -> Subscription {
        Subscription {
            uid: uid.to_string(),
            receiver: self.changes.subscribe(),
        }
    }
}
