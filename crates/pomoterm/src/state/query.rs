use crate::state::model::{FromRow, SessionRecord, Settings, Stats, UserDocument};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{named_params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::sync::LazyLock;
use uuid::Uuid;

/// DATABASE_SCHEMA for the database, embedded at compile time from `schema.sql`.
const DATABASE_SCHEMA: &str = include_str!("schema.sql");

/// Named SQL queries parsed from the embedded `query.sql` file.
///
/// Populated once on first access. Each query in `query.sql` is delimited by
/// a `-- name: <key>` header and a trailing `--` sentinel, for example:
///
/// ```sql
/// -- name: get_user
/// SELECT * FROM users WHERE uid = :uid
/// --
/// ```
///
/// The map key is the trimmed name string (e.g. `"get_user"`).
static DATABASE_QUERY: LazyLock<HashMap<String, String>> = LazyLock::new(|| {
    // Capture 1 = name, Capture 2 = SQL body (multiline via `(?s)`).
    let regexp = Regex::new(r"(?s)--\s*name:\s*([^\n]+)\n(.*?)\n--").expect("Invalid regex");
    const DATABASE_QUERY_RAW: &str = include_str!("query.sql");

    let mut queries = HashMap::new();
    for captures in regexp.captures_iter(DATABASE_QUERY_RAW) {
        let name = captures[1].trim().to_string();
        let query = captures[2].trim().to_string();
        queries.insert(name, query);
    }
    queries
});

/// Look up a named query from [`DATABASE_QUERY`].
fn named_query(name: &str) -> Result<&'static str> {
    DATABASE_QUERY
        .get(name)
        .map(String::as_str)
        .with_context(|| format!("Failed to get query {name}"))
}

/// Database manages the SQLite connection lifecycle: opening, migrating, and
/// vending transactions for [`Querier`] handles.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the on-disk database under `$XDG_STATE_HOME/pomoterm/`.
    pub fn open() -> Result<Self> {
        let path = xdg::BaseDirectories::with_prefix("pomoterm")
            .place_state_file("state.db")
            .context("Failed to determine database path")?;
        let conn = Connection::open(path).context("Failed to open database connection")?;
        Ok(Self { conn })
    }

    /// Open an ephemeral in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open database connection")?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying connection.
    ///
    /// Reads that need no atomicity go straight through the connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin an immediate SQLite transaction.
    ///
    /// The caller must call [`Transaction::commit`] explicitly; dropping
    /// without committing rolls back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to start transaction")
    }

    /// Apply the embedded SQL schema. Safe to call on an existing database.
    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(DATABASE_SCHEMA)
            .context("Failed to migrate database")
    }
}

/// Querier executes the named queries against a borrowed [`Connection`].
///
/// Pass either a plain connection or `&tx` for a [`Transaction`] (which
/// derefs to [`Connection`]).
pub struct Querier<'q> {
    conn: &'q Connection,
}

impl<'q> Querier<'q> {
    /// Create a [`Querier`] from a borrowed connection or transaction.
    pub fn new(conn: &'q Connection) -> Self {
        Self { conn }
    }

    /// Insert a user document and return it as stored.
    pub fn insert_user(&self, args: &InsertUserArgs) -> Result<UserDocument> {
        let mut operation = self
            .conn
            .prepare(named_query("insert_user")?)
            .context("Failed to prepare query")?;

        let document = args.document;
        operation
            .query_one(
                named_params! {
                    ":uid": document.uid,
                    ":email": document.email,
                    ":first_name": document.first_name,
                    ":last_name": document.last_name,
                    ":settings": document.settings,
                    ":stats": document.stats,
                    ":created_at": document.created_at,
                    ":updated_at": document.updated_at,
                    ":last_activity": document.last_activity,
                },
                UserDocument::from_row,
            )
            .context("Failed to execute query")
    }

    /// Retrieve the user document for `uid`, or `None` when there is none.
    pub fn get_user(&self, args: &UserIdArgs) -> Result<Option<UserDocument>> {
        let mut operation = self
            .conn
            .prepare(named_query("get_user")?)
            .context("Failed to prepare query")?;

        operation
            .query_row(named_params! { ":uid": args.uid }, UserDocument::from_row)
            .optional()
            .context("Failed to execute query")
    }

    /// Replace the settings of an existing user and return the updated document.
    ///
    /// Fails when the user does not exist.
    pub fn update_user_settings(&self, args: &UpdateUserSettingsArgs) -> Result<UserDocument> {
        let mut operation = self
            .conn
            .prepare(named_query("update_user_settings")?)
            .context("Failed to prepare query")?;

        operation
            .query_one(
                named_params! {
                    ":uid": args.uid,
                    ":settings": args.settings,
                    ":updated_at": args.updated_at,
                },
                UserDocument::from_row,
            )
            .context("Failed to execute query")
    }

    /// Replace the stats of an existing user and return the updated document.
    ///
    /// Fails when the user does not exist.
    pub fn update_user_stats(&self, args: &UpdateUserStatsArgs) -> Result<UserDocument> {
        let mut operation = self
            .conn
            .prepare(named_query("update_user_stats")?)
            .context("Failed to prepare query")?;

        operation
            .query_one(
                named_params! {
                    ":uid": args.uid,
                    ":stats": args.stats,
                    ":updated_at": args.updated_at,
                },
                UserDocument::from_row,
            )
            .context("Failed to execute query")
    }

    /// Delete the user document, returning the number of rows removed.
    pub fn delete_user(&self, args: &UserIdArgs) -> Result<usize> {
        self.conn
            .execute(named_query("delete_user")?, named_params! { ":uid": args.uid })
            .context("Failed to execute query")
    }

    /// Insert a session record row and return the persisted [`SessionRecord`].
    pub fn insert_session_record(&self, args: &InsertSessionRecordArgs) -> Result<SessionRecord> {
        let mut operation = self
            .conn
            .prepare(named_query("insert_session_record")?)
            .context("Failed to prepare query")?;

        let record = args.record;
        operation
            .query_one(
                named_params! {
                    ":session_record_id": args.session_record_id,
                    ":uid": args.uid,
                    ":session_name": record.session_name,
                    ":is_break": record.is_break,
                    ":timestamp": record.timestamp,
                    ":duration_minutes": record.duration_minutes,
                    ":commit_message": record.commit_message,
                },
                SessionRecord::from_row,
            )
            .context("Failed to execute query")
    }

    /// Delete all but the `limit` most recent session records of a user.
    pub fn trim_session_records(&self, args: &TrimSessionRecordsArgs) -> Result<usize> {
        self.conn
            .execute(
                named_query("trim_session_records")?,
                named_params! {
                    ":uid": args.uid,
                    ":limit": args.limit,
                },
            )
            .context("Failed to execute query")
    }

    /// Delete every session record of a user.
    pub fn delete_session_records(&self, args: &UserIdArgs) -> Result<usize> {
        self.conn
            .execute(
                named_query("delete_session_records")?,
                named_params! { ":uid": args.uid },
            )
            .context("Failed to execute query")
    }

    /// List the most recent session records of a user, newest first.
    #[cfg(test)]
    pub fn list_session_records(&self, args: &TrimSessionRecordsArgs) -> Result<Vec<SessionRecord>> {
        let mut operation = self
            .conn
            .prepare(named_query("list_session_records")?)
            .context("Failed to prepare query")?;

        let iterator = operation
            .query_map(
                named_params! {
                    ":uid": args.uid,
                    ":limit": args.limit,
                },
                SessionRecord::from_row,
            )
            .context("Failed to execute query")?;

        let mut collection = Vec::new();
        for item in iterator {
            let record = item.context("Failed to map query result")?;
            collection.push(record);
        }

        Ok(collection)
    }
}

/// Arguments for queries keyed by a user id alone.
#[derive(Debug)]
pub struct UserIdArgs<'u> {
    /// The user the query applies to.
    pub uid: &'u str,
}

/// Arguments for [`Querier::insert_user`].
#[derive(Debug)]
pub struct InsertUserArgs<'d> {
    /// The document to persist.
    pub document: &'d UserDocument,
}

/// Arguments for [`Querier::update_user_settings`].
#[derive(Debug)]
pub struct UpdateUserSettingsArgs<'a> {
    pub uid: &'a str,
    /// The full replacement value.
    pub settings: &'a Settings,
    /// Written to both `updated_at` and `last_activity`.
    pub updated_at: DateTime<Utc>,
}

/// Arguments for [`Querier::update_user_stats`].
#[derive(Debug)]
pub struct UpdateUserStatsArgs<'a> {
    pub uid: &'a str,
    /// The full replacement value.
    pub stats: &'a Stats,
    /// Written to both `updated_at` and `last_activity`.
    pub updated_at: DateTime<Utc>,
}

/// Arguments for [`Querier::insert_session_record`].
#[derive(Debug)]
pub struct InsertSessionRecordArgs<'a> {
    /// Generated key of the new row (UUID v7, so keys sort by insertion time).
    pub session_record_id: Uuid,
    pub uid: &'a str,
    pub record: &'a SessionRecord,
}

/// Arguments for [`Querier::trim_session_records`].
#[derive(Debug)]
pub struct TrimSessionRecordsArgs<'u> {
    pub uid: &'u str,
    /// Number of most recent rows to keep.
    pub limit: u32,
}
