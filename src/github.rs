//! GitHub REST API client
//!
//! Fetches merged pull requests (newest-updated-first) and their issue
//! comments for reviewer detection. Authenticates with a personal access
//! token. Everything is blocking; a failed call aborts the current sync
//! run, and whatever was already upserted stays valid.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::types::{IssueComment, Pull, ValidationError};

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

lazy_static! {
    // Applied to the lowercased comment body.
    static ref RE_APPROVAL: Regex =
        Regex::new(r"lgtm|sgtm|looks good to me|sounds good to me").unwrap();
}

/// Error type for GitHub operations
#[derive(Debug)]
pub enum GithubError {
    Http(reqwest::Error),
    NotAuthenticated,
    RateLimited,
    Status { url: String, status: u16 },
    Parse { message: String },
    InvalidPull(ValidationError),
}

impl std::fmt::Display for GithubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GithubError::Http(e) => write!(f, "GitHub request failed: {}", e),
            GithubError::NotAuthenticated => {
                write!(f, "GitHub rejected the personal access token")
            }
            GithubError::RateLimited => {
                write!(f, "GitHub API rate limit exceeded. Try again later.")
            }
            GithubError::Status { url, status } => {
                write!(f, "GitHub returned HTTP {} for {}", status, url)
            }
            GithubError::Parse { message } => {
                write!(f, "Failed to parse GitHub response: {}", message)
            }
            GithubError::InvalidPull(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GithubError {}

impl From<reqwest::Error> for GithubError {
    fn from(e: reqwest::Error) -> Self {
        GithubError::Http(e)
    }
}

impl From<ValidationError> for GithubError {
    fn from(e: ValidationError) -> Self {
        GithubError::InvalidPull(e)
    }
}

pub type Result<T> = std::result::Result<T, GithubError>;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub login: String,
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RefResponse {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct PullResponse {
    pub number: i64,
    pub title: String,
    pub user: UserResponse,
    pub base: RefResponse,
    pub head: RefResponse,
    /// Present only when the pull was actually merged, not merely closed.
    pub merged_at: Option<String>,
    pub updated_at: String,
    pub merge_commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentResponse {
    pub id: i64,
    pub user: UserResponse,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: i64,
}

// ============================================================================
// Client
// ============================================================================

/// How far a fetch should reach and which pulls it may skip.
#[derive(Debug, Default)]
pub struct FetchOptions {
    /// Incremental cursor: stop fetching entirely at the first pull whose
    /// `updated_at` is older than or equal to this. Remote results are
    /// sorted descending by update time, so this is a safe termination
    /// signal, not just an optimization.
    pub last_update: Option<DateTime<Utc>>,
    /// `(pull_number, updated_at)` pairs already stored; such pulls are
    /// skipped without a comment scan (full-init idempotence).
    pub skip: HashSet<(i64, DateTime<Utc>)>,
    /// Narrow the comment scan to pulls the search API flags as carrying an
    /// approval phrase. Pulls outside the narrowed set are still ingested,
    /// just assumed unreviewed, so the filter can never produce a false
    /// negative relative to the full scan.
    pub use_search: bool,
}

/// One fetched pull plus the comments examined while detecting its reviewer.
#[derive(Debug)]
pub struct FetchedPull {
    pub pull: Pull,
    pub comments: Vec<IssueComment>,
}

/// GitHub client with personal-access-token auth
pub struct GithubClient {
    client: Client,
    token: String,
    base_url: String,
}

impl GithubClient {
    pub fn new(token: &str) -> GithubClient {
        GithubClient {
            client: Client::new(),
            token: token.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Point the client at a different API root (test servers).
    pub fn with_base_url(token: &str, base_url: &str) -> GithubClient {
        GithubClient {
            client: Client::new(),
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", concat!("mergeaudit/", env!("CARGO_PKG_VERSION")))
            .send()?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(GithubError::NotAuthenticated);
        }
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(GithubError::RateLimited);
        }
        if !status.is_success() {
            return Err(GithubError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| GithubError::Parse {
            message: format!("{} from {}", e, url),
        })
    }

    /// Merged pulls for `owner/repo`, newest-updated-first, bounded by the
    /// options. Each pull arrives with its detected reviewer and the
    /// comments that were scanned, and is handed to `sink` as soon as it is
    /// complete, so anything the sink persisted survives a failure later in
    /// the fetch. Returns the number of pulls delivered.
    pub fn fetch_merged_pulls<E, F>(
        &self,
        owner: &str,
        repo: &str,
        options: &FetchOptions,
        mut sink: F,
    ) -> std::result::Result<usize, E>
    where
        E: From<GithubError>,
        F: FnMut(FetchedPull) -> std::result::Result<(), E>,
    {
        let reviewed = if options.use_search {
            Some(self.search_reviewed_issues(owner, repo)?)
        } else {
            None
        };

        let mut count = 0usize;
        let mut page = 1usize;
        'pages: loop {
            let path = format!("/repos/{}/{}/pulls", owner, repo);
            let batch: Vec<PullResponse> = self.get_json(
                &path,
                &[
                    ("state", "closed".to_string()),
                    ("sort", "updated".to_string()),
                    ("direction", "desc".to_string()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            for pull in batch {
                // Closed-but-unmerged pulls carry no merged_at.
                let merged_at = match &pull.merged_at {
                    Some(t) => parse_timestamp(t)?,
                    None => continue,
                };
                let updated = parse_timestamp(&pull.updated_at)?;
                info!(number = pull.number, updated = %pull.updated_at, "pull");

                if past_cursor(&updated, options.last_update.as_ref()) {
                    warn!(
                        number = pull.number,
                        "reached the last already-synced pull, stopping"
                    );
                    break 'pages;
                }
                if options.skip.contains(&(pull.number, updated)) {
                    info!(number = pull.number, "already stored, skipping");
                    continue;
                }

                // Comment scan, narrowed by the search pre-filter when asked.
                let scan = match &reviewed {
                    Some(numbers) => numbers.contains(&pull.number),
                    None => true,
                };
                let comments = if scan {
                    self.list_issue_comments(owner, repo, pull.number)?
                } else {
                    Vec::new()
                };
                let reviewer = detect_reviewer(&pull.user.login, &comments);

                let record = Pull::new(
                    owner.to_string(),
                    repo.to_string(),
                    pull.number,
                    pull.user.login,
                    pull.base.sha,
                    pull.head.sha,
                    reviewer,
                    merged_at,
                    pull.title,
                    updated,
                    pull.merge_commit_sha,
                    None,
                )
                .map_err(GithubError::InvalidPull)?;
                sink(FetchedPull {
                    pull: record,
                    comments,
                })?;
                count += 1;
            }

            if batch_len < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(count)
    }

    /// All comments on an issue/pull, chronological order.
    pub fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<IssueComment>> {
        let path = format!("/repos/{}/{}/issues/{}/comments", owner, repo, number);
        let mut comments = Vec::new();
        let mut page = 1usize;
        loop {
            let batch: Vec<CommentResponse> = self.get_json(
                &path,
                &[
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();
            for c in batch {
                comments.push(IssueComment {
                    gh_owner: owner.to_string(),
                    gh_repo: repo.to_string(),
                    gh_user: c.user.login,
                    gh_user_id: c.user.id,
                    update_time: parse_timestamp(&c.updated_at)?,
                    create_time: parse_timestamp(&c.created_at)?,
                    comment_id: c.id,
                    issue_number: number,
                    body: c.body.unwrap_or_default(),
                });
            }
            if batch_len < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(comments)
    }

    /// Issue numbers of closed pulls whose comments mention an approval
    /// phrase, per the search API.
    fn search_reviewed_issues(&self, owner: &str, repo: &str) -> Result<HashSet<i64>> {
        let query = format!(
            "repo:{}/{} type:pr in:comments is:closed \
             (LGTM OR SGTM OR \"looks good to me\" OR \"sounds good to me\")",
            owner, repo
        );
        info!(%query, "search pre-filter");
        let mut numbers = HashSet::new();
        let mut page = 1usize;
        loop {
            let response: SearchResponse = self.get_json(
                "/search/issues",
                &[
                    ("q", query.clone()),
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            if response.items.is_empty() {
                break;
            }
            let batch_len = response.items.len();
            numbers.extend(response.items.into_iter().map(|i| i.number));
            if batch_len < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(numbers)
    }
}

/// True once the descending fetch has reached material the store already
/// holds: `updated` at or before the cursor.
fn past_cursor(updated: &DateTime<Utc>, cursor: Option<&DateTime<Utc>>) -> bool {
    match cursor {
        Some(c) => updated <= c,
        None => false,
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GithubError::Parse {
            message: format!("bad timestamp '{}': {}", s, e),
        })
}

/// Pick the reviewer: the author of the first comment, in chronological
/// order, that is not from the requester and whose body contains an
/// approval phrase. No match means no reviewer, which is a valid terminal
/// state rather than an error.
pub fn detect_reviewer(requester: &str, comments: &[IssueComment]) -> Option<String> {
    for comment in comments {
        if comment.gh_user == requester {
            continue;
        }
        if RE_APPROVAL.is_match(&comment.body.to_lowercase()) {
            return Some(comment.gh_user.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn comment(user: &str, body: &str) -> IssueComment {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        IssueComment {
            gh_owner: "octo".to_string(),
            gh_repo: "widgets".to_string(),
            gh_user: user.to_string(),
            gh_user_id: 1,
            update_time: t,
            create_time: t,
            comment_id: 1,
            issue_number: 7,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_detect_reviewer_first_match_wins() {
        let comments = vec![
            comment("carol", "what does this do?"),
            comment("bob", "LGTM!"),
            comment("dave", "sgtm"),
        ];
        assert_eq!(detect_reviewer("alice", &comments).as_deref(), Some("bob"));
    }

    #[test]
    fn test_detect_reviewer_skips_requester() {
        // The requester approving their own pull does not count, even with
        // a matching phrase.
        let comments = vec![
            comment("alice", "lgtm, merging"),
            comment("bob", "looks good to me"),
        ];
        assert_eq!(detect_reviewer("alice", &comments).as_deref(), Some("bob"));
    }

    #[test]
    fn test_detect_reviewer_no_match_is_none() {
        let comments = vec![comment("bob", "needs work"), comment("carol", "ping?")];
        assert_eq!(detect_reviewer("alice", &comments), None);
        assert_eq!(detect_reviewer("alice", &[]), None);
    }

    #[test]
    fn test_approval_phrases_case_insensitive() {
        for body in ["LGTM", "Sounds Good To Me", "this sgtm overall", "Looks good to me!"] {
            assert_eq!(
                detect_reviewer("alice", &[comment("bob", body)]).as_deref(),
                Some("bob"),
                "phrase not detected: {}",
                body
            );
        }
    }

    #[test]
    fn test_past_cursor() {
        let cursor = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        assert!(past_cursor(&older, Some(&cursor)));
        // Equal counts as reached: it is already stored.
        assert!(past_cursor(&cursor, Some(&cursor)));
        assert!(!past_cursor(&newer, Some(&cursor)));
        assert!(!past_cursor(&older, None));
    }

    #[test]
    fn test_parse_pull_response() {
        let json = r#"{
            "number": 42,
            "title": "Add widgets",
            "user": {"login": "alice", "id": 11},
            "base": {"sha": "aaa111"},
            "head": {"sha": "bbb222"},
            "merged_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T11:00:00Z",
            "merge_commit_sha": "ccc333"
        }"#;
        let pull: PullResponse = serde_json::from_str(json).unwrap();
        assert_eq!(pull.number, 42);
        assert_eq!(pull.head.sha, "bbb222");
        assert!(pull.merged_at.is_some());

        // Closed-but-unmerged pulls arrive with a null merged_at.
        let unmerged = json.replace("\"2024-05-01T10:00:00Z\"", "null");
        let pull: PullResponse = serde_json::from_str(&unmerged).unwrap();
        assert!(pull.merged_at.is_none());
    }

    #[test]
    fn test_parse_timestamp() {
        let t = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
