//! Pull sync engine
//!
//! Ties the GitHub client to the store. Two modes: incremental update,
//! which stops fetching at the stored cursor, and full initialization,
//! which walks everything and skips pulls already on record. Both are safe
//! to interrupt: upserts already committed are idempotent, so a failed run
//! leaves a valid (merely incomplete) store.

use std::collections::HashSet;
use tracing::info;

use crate::db::{DbError, Store};
use crate::github::{FetchOptions, GithubClient, GithubError};

#[derive(Debug)]
pub enum SyncError {
    Db(DbError),
    Github(GithubError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Db(e) => write!(f, "{}", e),
            SyncError::Github(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<DbError> for SyncError {
    fn from(e: DbError) -> Self {
        SyncError::Db(e)
    }
}

impl From<GithubError> for SyncError {
    fn from(e: GithubError) -> Self {
        SyncError::Github(e)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

fn ingest(store: &Store, client: &GithubClient, gh_owner: &str, gh_repo: &str, options: &FetchOptions) -> Result<usize> {
    // Each pull is upserted as it arrives. A remote failure partway
    // through (rate limit, network) aborts the run but keeps everything
    // already persisted; the next run resumes past it.
    client.fetch_merged_pulls(gh_owner, gh_repo, options, |item| {
        store.add_pull(&item.pull)?;
        for comment in &item.comments {
            store.add_comment(comment)?;
        }
        Ok(())
    })
}

/// Incremental sync: fetch newest-updated-first and stop at the stored
/// cursor (the maximum `pull_updated` already persisted). Returns the
/// number of pulls upserted.
pub fn update_pulls(
    store: &Store,
    client: &GithubClient,
    gh_owner: &str,
    gh_repo: &str,
    use_search: bool,
) -> Result<usize> {
    let cursor = store.last_update()?;
    info!(?cursor, "incremental pull sync");
    let options = FetchOptions {
        last_update: cursor,
        skip: HashSet::new(),
        use_search,
    };
    let count = ingest(store, client, gh_owner, gh_repo, &options)?;
    info!(count, "pulls upserted");
    Ok(count)
}

/// Full initialization: no cursor short-circuit; pulls whose
/// `(pull_number, pull_updated)` pair is already stored are skipped, so a
/// re-run after interruption is idempotent. Returns the number of pulls
/// upserted.
pub fn init_pulls(
    store: &Store,
    client: &GithubClient,
    gh_owner: &str,
    gh_repo: &str,
    use_search: bool,
) -> Result<usize> {
    let skip = store.stored_keys(gh_owner, gh_repo)?;
    info!(already_stored = skip.len(), "full pull sync");
    let options = FetchOptions {
        last_update: None,
        skip,
        use_search,
    };
    let count = ingest(store, client, gh_owner, gh_repo, &options)?;
    info!(count, "pulls upserted");
    Ok(count)
}
