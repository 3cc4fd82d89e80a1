//! mergeaudit - audit git merge history against GitHub pull requests
//!
//! Answers, for every merge into a protected branch: was there a
//! corresponding pull request, and did it carry evidence of human review?
//!
//! # Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | Extract first-parent history with diff stats | [`git`] (memoized via [`cache`]) |
//! | Sync merged pulls + reviewer detection | [`github`], [`sync`], stored by [`db`] |
//! | Join merges to pulls by SHA linkage | [`report`] |
//! | Render violations / full report as CSV | [`report`] |
//!
//! The whole crate is synchronous and single-threaded; the working tree of
//! the audited clone is shared mutable state (checkout switches it), so
//! run one instance per clone. Nothing here writes to GitHub or to the
//! repository content.
//!
//! # Quick Start
//!
//! ```no_run
//! use mergeaudit::cache::DiffStatCache;
//! use mergeaudit::git::GitRepo;
//! use mergeaudit::report::{correlate, filter_violations};
//!
//! let repo = GitRepo::new("data/widgets", "main").unwrap();
//! let mut cache = DiffStatCache::in_dir(repo.dir());
//! let commits = repo.all_commits(&mut cache).unwrap();
//! let annotated = correlate(&commits, &[]);
//! println!("{} unreviewed commits", filter_violations(&annotated).len());
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod git;
pub mod github;
pub mod report;
pub mod schema;
pub mod sync;
pub mod types;

pub use cache::{DiffStatCache, DiffStats};
pub use config::Config;
pub use db::Store;
pub use git::GitRepo;
pub use github::GithubClient;
pub use report::{classify, correlate, filter_violations, report_rows, write_csv, CommitKind};
pub use types::{Commit, IssueComment, Pull, Repo};
