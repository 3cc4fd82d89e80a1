//! SQLite persistence with Diesel ORM
//!
//! Two tables: `pulls`, upserted by `(gh_owner, gh_repo, pull_number)`
//! identity, and `issue_comments`, an append-only audit trail of every
//! comment examined during reviewer detection. Timestamps are stored as
//! RFC 3339 text and surfaced as `DateTime<Utc>`.

use crate::schema::{issue_comments, pulls};
use crate::types::{IssueComment, Pull};
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Error type for store operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    /// A stored timestamp failed to parse back; the database was written
    /// by something other than this tool.
    Corrupt(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Corrupt(msg) => write!(f, "Corrupt store: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable pull row
#[derive(Insertable)]
#[diesel(table_name = pulls)]
struct NewPullRow<'a> {
    gh_owner: &'a str,
    gh_repo: &'a str,
    pull_number: i64,
    pull_requester: &'a str,
    base_sha: &'a str,
    head_sha: &'a str,
    pull_reviewer: Option<&'a str>,
    merge_time: String,
    pull_title: &'a str,
    pull_updated: String,
    merge_sha: Option<&'a str>,
    work_tickets: Option<&'a str>,
}

/// Queryable pull row
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = pulls)]
struct PullRow {
    #[allow(dead_code)]
    id: i32,
    gh_owner: String,
    gh_repo: String,
    pull_number: i64,
    pull_requester: String,
    base_sha: String,
    head_sha: String,
    pull_reviewer: Option<String>,
    merge_time: String,
    pull_title: String,
    pull_updated: String,
    merge_sha: Option<String>,
    work_tickets: Option<String>,
}

impl PullRow {
    fn into_pull(self) -> Result<Pull> {
        Ok(Pull {
            gh_owner: self.gh_owner,
            gh_repo: self.gh_repo,
            pull_number: self.pull_number,
            pull_requester: self.pull_requester,
            base_sha: self.base_sha,
            head_sha: self.head_sha,
            pull_reviewer: self.pull_reviewer,
            merge_time: parse_time(&self.merge_time)?,
            pull_title: self.pull_title,
            pull_updated: parse_time(&self.pull_updated)?,
            merge_sha: self.merge_sha,
            work_tickets: self.work_tickets,
        })
    }
}

/// Insertable issue comment row
#[derive(Insertable)]
#[diesel(table_name = issue_comments)]
struct NewCommentRow<'a> {
    gh_owner: &'a str,
    gh_repo: &'a str,
    gh_user: &'a str,
    gh_user_id: i64,
    update_time: String,
    create_time: String,
    comment_id: i64,
    issue_number: i64,
    body: &'a str,
}

/// Queryable issue comment row
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = issue_comments)]
struct CommentRow {
    #[allow(dead_code)]
    id: i32,
    gh_owner: String,
    gh_repo: String,
    gh_user: String,
    gh_user_id: i64,
    update_time: String,
    create_time: String,
    comment_id: i64,
    issue_number: i64,
    body: String,
}

impl CommentRow {
    fn into_comment(self) -> Result<IssueComment> {
        Ok(IssueComment {
            gh_owner: self.gh_owner,
            gh_repo: self.gh_repo,
            gh_user: self.gh_user,
            gh_user_id: self.gh_user_id,
            update_time: parse_time(&self.update_time)?,
            create_time: parse_time(&self.create_time)?,
            comment_id: self.comment_id,
            issue_number: self.issue_number,
            body: self.body,
        })
    }
}

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

// ============================================================================
// Store
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Pull/comment store, opened for the scope of one operation.
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open (creating if necessary) the store at the given path.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Store> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbError::Connection(e.to_string()))?;
            }
        }
        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        // Single writer by design; no concurrent access to pool.
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let store = Store { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS pulls (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                gh_owner TEXT NOT NULL,
                gh_repo TEXT NOT NULL,
                pull_number BIGINT NOT NULL,
                pull_requester TEXT NOT NULL,
                base_sha TEXT NOT NULL,
                head_sha TEXT NOT NULL,
                pull_reviewer TEXT,
                merge_time TEXT NOT NULL,
                pull_title TEXT NOT NULL,
                pull_updated TEXT NOT NULL,
                merge_sha TEXT,
                work_tickets TEXT,
                UNIQUE(gh_owner, gh_repo, pull_number)
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS issue_comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                gh_owner TEXT NOT NULL,
                gh_repo TEXT NOT NULL,
                gh_user TEXT NOT NULL,
                gh_user_id BIGINT NOT NULL,
                update_time TEXT NOT NULL,
                create_time TEXT NOT NULL,
                comment_id BIGINT NOT NULL,
                issue_number BIGINT NOT NULL,
                body TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;
        Ok(())
    }

    /// Add or update a pull. The `(gh_owner, gh_repo, pull_number)`
    /// identity decides: an existing row has every other field overwritten,
    /// a new identity inserts. Never duplicates.
    pub fn add_pull(&self, pull: &Pull) -> Result<()> {
        let mut conn = self.get_conn()?;
        let existing: Option<i32> = pulls::table
            .filter(pulls::gh_owner.eq(&pull.gh_owner))
            .filter(pulls::gh_repo.eq(&pull.gh_repo))
            .filter(pulls::pull_number.eq(pull.pull_number))
            .select(pulls::id)
            .first::<i32>(&mut conn)
            .optional()?;

        if let Some(id) = existing {
            debug!(number = pull.pull_number, "updating pull");
            diesel::update(pulls::table.find(id))
                .set((
                    pulls::pull_requester.eq(&pull.pull_requester),
                    pulls::base_sha.eq(&pull.base_sha),
                    pulls::head_sha.eq(&pull.head_sha),
                    pulls::pull_reviewer.eq(pull.pull_reviewer.as_deref()),
                    pulls::merge_time.eq(fmt_time(&pull.merge_time)),
                    pulls::pull_title.eq(&pull.pull_title),
                    pulls::pull_updated.eq(fmt_time(&pull.pull_updated)),
                    pulls::merge_sha.eq(pull.merge_sha.as_deref()),
                    pulls::work_tickets.eq(pull.work_tickets.as_deref()),
                ))
                .execute(&mut conn)?;
        } else {
            debug!(number = pull.pull_number, "inserting pull");
            let row = NewPullRow {
                gh_owner: &pull.gh_owner,
                gh_repo: &pull.gh_repo,
                pull_number: pull.pull_number,
                pull_requester: &pull.pull_requester,
                base_sha: &pull.base_sha,
                head_sha: &pull.head_sha,
                pull_reviewer: pull.pull_reviewer.as_deref(),
                merge_time: fmt_time(&pull.merge_time),
                pull_title: &pull.pull_title,
                pull_updated: fmt_time(&pull.pull_updated),
                merge_sha: pull.merge_sha.as_deref(),
                work_tickets: pull.work_tickets.as_deref(),
            };
            diesel::insert_into(pulls::table)
                .values(&row)
                .execute(&mut conn)?;
        }
        Ok(())
    }

    /// Every stored pull.
    pub fn readall(&self) -> Result<Vec<Pull>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<PullRow> = pulls::table.load(&mut conn)?;
        rows.into_iter().map(PullRow::into_pull).collect()
    }

    /// All stored pulls for one repository.
    pub fn pulls_for_repo(&self, gh_owner: &str, gh_repo: &str) -> Result<Vec<Pull>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<PullRow> = pulls::table
            .filter(pulls::gh_owner.eq(gh_owner))
            .filter(pulls::gh_repo.eq(gh_repo))
            .load(&mut conn)?;
        rows.into_iter().map(PullRow::into_pull).collect()
    }

    /// The incremental-sync cursor: the newest `pull_updated` on record.
    pub fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.get_conn()?;
        let stamps: Vec<String> = pulls::table.select(pulls::pull_updated).load(&mut conn)?;
        let mut latest = None;
        for stamp in stamps {
            let t = parse_time(&stamp)?;
            if latest.map_or(true, |l| t > l) {
                latest = Some(t);
            }
        }
        Ok(latest)
    }

    /// `(pull_number, pull_updated)` identity pairs already on record for a
    /// repository, for the full-init skip set.
    pub fn stored_keys(&self, gh_owner: &str, gh_repo: &str) -> Result<HashSet<(i64, DateTime<Utc>)>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<(i64, String)> = pulls::table
            .filter(pulls::gh_owner.eq(gh_owner))
            .filter(pulls::gh_repo.eq(gh_repo))
            .select((pulls::pull_number, pulls::pull_updated))
            .load(&mut conn)?;
        let mut keys = HashSet::new();
        for (number, stamp) in rows {
            keys.insert((number, parse_time(&stamp)?));
        }
        Ok(keys)
    }

    /// Append one comment to the audit trail. Always inserts; edits on the
    /// hosting side show up as new rows.
    pub fn add_comment(&self, comment: &IssueComment) -> Result<()> {
        let mut conn = self.get_conn()?;
        let row = NewCommentRow {
            gh_owner: &comment.gh_owner,
            gh_repo: &comment.gh_repo,
            gh_user: &comment.gh_user,
            gh_user_id: comment.gh_user_id,
            update_time: fmt_time(&comment.update_time),
            create_time: fmt_time(&comment.create_time),
            comment_id: comment.comment_id,
            issue_number: comment.issue_number,
            body: &comment.body,
        };
        diesel::insert_into(issue_comments::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Audit-trail comments recorded for one issue/pull, oldest first.
    pub fn comments_for_issue(
        &self,
        gh_owner: &str,
        gh_repo: &str,
        issue_number: i64,
    ) -> Result<Vec<IssueComment>> {
        let mut conn = self.get_conn()?;
        let rows: Vec<CommentRow> = issue_comments::table
            .filter(issue_comments::gh_owner.eq(gh_owner))
            .filter(issue_comments::gh_repo.eq(gh_repo))
            .filter(issue_comments::issue_number.eq(issue_number))
            .order(issue_comments::create_time.asc())
            .load(&mut conn)?;
        rows.into_iter().map(CommentRow::into_comment).collect()
    }
}
