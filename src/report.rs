//! Correlation and reporting
//!
//! Joins the extracted commit stream with the stored pull set by SHA
//! linkage (a merge's second parent against `Pull.head_sha`), then renders
//! the annotated stream as CSV, optionally bounded by a time window. A
//! commit left without a reviewer after correlation is a violation,
//! whether it was a direct push or an unreviewed pull.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use std::collections::HashMap;
use std::io::Write;

use crate::types::{Commit, Pull};

/// Index pulls by `head_sha`. When several pulls share a head (force-push,
/// close-and-reopen) the one with the highest `pull_number` wins the slot;
/// the original data gives no better tiebreak, and this at least makes the
/// choice deterministic.
pub fn build_head_index(pulls: &[Pull]) -> HashMap<&str, &Pull> {
    let mut index: HashMap<&str, &Pull> = HashMap::new();
    for pull in pulls {
        index
            .entry(pull.head_sha.as_str())
            .and_modify(|existing| {
                if pull.pull_number > existing.pull_number {
                    *existing = pull;
                }
            })
            .or_insert(pull);
    }
    index
}

/// Annotate the commit stream with pull numbers and reviewers. Order and
/// content are preserved; only merge commits whose second parent matches a
/// pull's head SHA gain `pr_number`/`pr_reviewer`.
pub fn correlate(commits: &[Commit], pulls: &[Pull]) -> Vec<Commit> {
    let index = build_head_index(pulls);
    commits
        .iter()
        .map(|commit| match commit.merge_head().and_then(|h| index.get(h)) {
            Some(pull) => commit.with_pull(pull.pull_number, pull.pull_reviewer.clone()),
            None => commit.clone(),
        })
        .collect()
}

/// Commits with no identified reviewer after correlation.
pub fn filter_violations(commits: &[Commit]) -> Vec<Commit> {
    commits
        .iter()
        .filter(|c| c.pr_reviewer.is_none())
        .cloned()
        .collect()
}

/// Classification of a report row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Direct,
    Merge,
    Pull,
}

impl std::fmt::Display for CommitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitKind::Direct => write!(f, "direct"),
            CommitKind::Merge => write!(f, "merge"),
            CommitKind::Pull => write!(f, "pull"),
        }
    }
}

/// `pull` beats `merge` beats `direct`.
pub fn classify(commit: &Commit) -> CommitKind {
    if commit.pr_number.is_some() {
        CommitKind::Pull
    } else if commit.is_merge() {
        CommitKind::Merge
    } else {
        CommitKind::Direct
    }
}

/// One rendered report row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub hexsha: String,
    pub email: String,
    pub when: String,
    pub kind: CommitKind,
    pub pr_number: Option<i64>,
    pub pr_reviewer: Option<String>,
}

/// Lazy report rows over a time-descending commit stream. With a window,
/// iteration *stops* at the first commit older than `now - hours` rather
/// than filtering: the input is newest-first, so early termination is
/// exact.
pub fn report_rows<'a>(
    commits: &'a [Commit],
    since_hours: Option<i64>,
    now: DateTime<Utc>,
) -> impl Iterator<Item = ReportRow> + 'a {
    let cutoff = since_hours.map(|hours| (now - Duration::hours(hours)).timestamp());
    commits
        .iter()
        .take_while(move |commit| match cutoff {
            Some(cutoff) => commit.time >= cutoff,
            None => true,
        })
        .map(|commit| ReportRow {
            hexsha: commit.hexsha.clone(),
            email: commit.email.clone(),
            when: format_local(commit.time),
            kind: classify(commit),
            pr_number: commit.pr_number,
            pr_reviewer: commit.pr_reviewer.clone(),
        })
}

fn format_local(epoch: i64) -> String {
    match Local.timestamp_opt(epoch, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch.to_string(),
    }
}

/// Write the CSV report. Absent pull number/reviewer render as empty
/// fields.
pub fn write_csv<W: Write>(
    out: &mut W,
    rows: impl Iterator<Item = ReportRow>,
) -> std::io::Result<()> {
    writeln!(out, "Commit,Who,When,What,Reviewed,Reviewer")?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            row.hexsha,
            row.email,
            row.when,
            row.kind,
            row.pr_number.map(|n| n.to_string()).unwrap_or_default(),
            row.pr_reviewer.unwrap_or_default(),
        )?;
    }
    Ok(())
}
