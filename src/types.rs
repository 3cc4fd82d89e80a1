//! Core value records: commits, pulls, issue comments, repo handles
//!
//! Everything here is an immutable value type. Correlation never mutates a
//! `Commit` in place; it produces an annotated copy via [`Commit::with_pull`].

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A single commit on the audited branch, with diff statistics against its
/// first parent.
///
/// `pr_number` and `pr_reviewer` start out `None` and are filled in by the
/// correlation pass. They are never written back to git or the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hexsha: String,
    /// Parent SHAs in order. Empty = root commit, one = direct commit,
    /// two or more = merge. For a merge, `parents[1]` is the tip of the
    /// branch that was merged in.
    pub parents: Vec<String>,
    pub author: String,
    pub email: String,
    /// Commit timestamp, Unix seconds.
    pub time: i64,
    pub ct_added: u64,
    pub ct_removed: u64,
    pub ct_files: u64,
    pub files: Vec<String>,
    pub pr_number: Option<i64>,
    pub pr_reviewer: Option<String>,
}

impl Commit {
    /// True when this commit integrates a side branch (two or more parents).
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// True when this commit landed directly on the branch (exactly one parent).
    pub fn is_direct(&self) -> bool {
        self.parents.len() == 1
    }

    /// The join key to `Pull.head_sha`: the second parent of a merge.
    pub fn merge_head(&self) -> Option<&str> {
        if self.is_merge() {
            Some(&self.parents[1])
        } else {
            None
        }
    }

    /// Copy of this commit annotated with the originating pull request.
    pub fn with_pull(&self, pr_number: i64, pr_reviewer: Option<String>) -> Commit {
        Commit {
            pr_number: Some(pr_number),
            pr_reviewer,
            ..self.clone()
        }
    }
}

/// Error for a record that fails constructor validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid record: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// A merged pull request, identity `(gh_owner, gh_repo, pull_number)`.
///
/// Re-ingesting the same identity overwrites every other field (upsert
/// semantics), so later corrections on the hosting side are captured on
/// resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pull {
    pub gh_owner: String,
    pub gh_repo: String,
    pub pull_number: i64,
    pub pull_requester: String,
    pub base_sha: String,
    pub head_sha: String,
    pub pull_reviewer: Option<String>,
    pub merge_time: DateTime<Utc>,
    pub pull_title: String,
    /// Last-modified timestamp on the hosting side; the incremental sync
    /// cursor.
    pub pull_updated: DateTime<Utc>,
    pub merge_sha: Option<String>,
    pub work_tickets: Option<String>,
}

impl Pull {
    /// Validated constructor. A pull with no number or no head SHA cannot
    /// be correlated and is rejected outright.
    pub fn new(
        gh_owner: String,
        gh_repo: String,
        pull_number: i64,
        pull_requester: String,
        base_sha: String,
        head_sha: String,
        pull_reviewer: Option<String>,
        merge_time: DateTime<Utc>,
        pull_title: String,
        pull_updated: DateTime<Utc>,
        merge_sha: Option<String>,
        work_tickets: Option<String>,
    ) -> Result<Pull, ValidationError> {
        if pull_number <= 0 {
            return Err(ValidationError(format!(
                "pull_number must be positive, got {}",
                pull_number
            )));
        }
        if head_sha.is_empty() {
            return Err(ValidationError(format!(
                "pull #{} has an empty head_sha",
                pull_number
            )));
        }
        if gh_owner.is_empty() || gh_repo.is_empty() {
            return Err(ValidationError(format!(
                "pull #{} is missing its owner/repo identity",
                pull_number
            )));
        }
        Ok(Pull {
            gh_owner,
            gh_repo,
            pull_number,
            pull_requester,
            base_sha,
            head_sha,
            pull_reviewer,
            merge_time,
            pull_title,
            pull_updated,
            merge_sha,
            work_tickets,
        })
    }
}

/// One issue comment examined during reviewer detection. Kept append-only
/// in the store as an audit trail; edits on the hosting side produce new
/// rows, never updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub gh_owner: String,
    pub gh_repo: String,
    pub gh_user: String,
    pub gh_user_id: i64,
    pub update_time: DateTime<Utc>,
    pub create_time: DateTime<Utc>,
    pub comment_id: i64,
    pub issue_number: i64,
    pub body: String,
}

/// One audited repository: a GitHub identity plus a local clone and branch.
/// Supplied by the config file, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub label: String,
    pub gh_owner: String,
    pub gh_repo: String,
    pub git_dir: PathBuf,
    pub branch: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_pull(number: i64, head_sha: &str) -> Result<Pull, ValidationError> {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Pull::new(
            "octo".to_string(),
            "widgets".to_string(),
            number,
            "alice".to_string(),
            "aaa111".to_string(),
            head_sha.to_string(),
            None,
            t,
            "Add widgets".to_string(),
            t,
            None,
            None,
        )
    }

    #[test]
    fn test_merge_classification() {
        let commit = Commit {
            hexsha: "abc".to_string(),
            parents: vec!["p1".to_string(), "p2".to_string()],
            author: "a".to_string(),
            email: "a@example.com".to_string(),
            time: 1700000000,
            ct_added: 0,
            ct_removed: 0,
            ct_files: 0,
            files: vec![],
            pr_number: None,
            pr_reviewer: None,
        };
        assert!(commit.is_merge());
        assert!(!commit.is_direct());
        assert_eq!(commit.merge_head(), Some("p2"));
    }

    #[test]
    fn test_direct_and_root_have_no_merge_head() {
        let mut commit = Commit {
            hexsha: "abc".to_string(),
            parents: vec!["p1".to_string()],
            author: "a".to_string(),
            email: "a@example.com".to_string(),
            time: 1700000000,
            ct_added: 0,
            ct_removed: 0,
            ct_files: 0,
            files: vec![],
            pr_number: None,
            pr_reviewer: None,
        };
        assert!(commit.is_direct());
        assert_eq!(commit.merge_head(), None);

        commit.parents.clear();
        assert!(!commit.is_direct());
        assert!(!commit.is_merge());
        assert_eq!(commit.merge_head(), None);
    }

    #[test]
    fn test_with_pull_preserves_everything_else() {
        let commit = Commit {
            hexsha: "abc".to_string(),
            parents: vec!["p1".to_string(), "p2".to_string()],
            author: "a".to_string(),
            email: "a@example.com".to_string(),
            time: 1700000000,
            ct_added: 12,
            ct_removed: 3,
            ct_files: 2,
            files: vec!["src/lib.rs".to_string()],
            pr_number: None,
            pr_reviewer: None,
        };
        let annotated = commit.with_pull(42, Some("bob".to_string()));
        assert_eq!(annotated.pr_number, Some(42));
        assert_eq!(annotated.pr_reviewer.as_deref(), Some("bob"));
        assert_eq!(annotated.hexsha, commit.hexsha);
        assert_eq!(annotated.ct_added, commit.ct_added);
        assert_eq!(annotated.files, commit.files);
    }

    #[test]
    fn test_pull_validation() {
        assert!(sample_pull(7, "bbb222").is_ok());
        assert!(sample_pull(0, "bbb222").is_err());
        assert!(sample_pull(-3, "bbb222").is_err());
        assert!(sample_pull(7, "").is_err());
    }
}
