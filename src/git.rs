//! History extraction from a local clone
//!
//! Walks first-parent history of the audited branch and computes per-commit
//! diff statistics against the first parent, memoized in a [`DiffStatCache`].
//! All git invocations run against an explicit repository handle; nothing
//! here touches the process working directory.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::cache::{CacheError, DiffStatCache, DiffStats};
use crate::types::Commit;

lazy_static! {
    // `git diff --numstat` line: added, removed, path. Binary files report
    // "-" for both counts.
    static ref RE_NUMSTAT: Regex = Regex::new(r"^(\d+|-)\s+(\d+|-)\s+(.*)$").unwrap();
}

/// Error type for git operations
#[derive(Debug)]
pub enum GitError {
    Io(std::io::Error),
    CommandFailed { command: String, stderr: String },
    Output(std::string::FromUtf8Error),
    /// A rev-list line did not split into the five expected fields.
    /// Fatal for the whole extraction run; there is no partial recovery.
    HistoryLine(String),
    /// A numstat line matched neither numeric counts nor the binary marker.
    NumstatLine(String),
    Cache(CacheError),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::Io(e) => write!(f, "Failed to run git: {}", e),
            GitError::CommandFailed { command, stderr } => {
                write!(f, "Command '{}' failed: {}", command, stderr)
            }
            GitError::Output(e) => write!(f, "Git produced non-UTF-8 output: {}", e),
            GitError::HistoryLine(line) => {
                write!(f, "Unparseable rev-list line: '{}'", line)
            }
            GitError::NumstatLine(line) => {
                write!(f, "Unparseable numstat line: '{}'", line)
            }
            GitError::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GitError {}

impl From<std::io::Error> for GitError {
    fn from(e: std::io::Error) -> Self {
        GitError::Io(e)
    }
}

impl From<std::string::FromUtf8Error> for GitError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GitError::Output(e)
    }
}

impl From<CacheError> for GitError {
    fn from(e: CacheError) -> Self {
        GitError::Cache(e)
    }
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Handle to one local clone and the branch under audit.
///
/// Carries an absolute path; every operation resolves against it instead of
/// the ambient process working directory, so nothing needs to save and
/// restore a cwd. The working tree itself is still shared mutable state
/// (checkout switches it), so one instance per clone.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    branch: String,
}

impl GitRepo {
    pub fn new<P: AsRef<Path>>(dir: P, branch: &str) -> Result<GitRepo> {
        let dir = dir.as_ref().canonicalize()?;
        Ok(GitRepo {
            dir,
            branch: branch.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run git inside the clone and return stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        debug!(dir = %self.dir.display(), "git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8(output.stdout)?)
    }

    pub fn checkout(&self) -> Result<()> {
        self.run(&["checkout", &self.branch, "--quiet"])?;
        Ok(())
    }

    /// Fast-forward the branch and return the new HEAD's hexsha.
    pub fn update(&self) -> Result<String> {
        self.checkout()?;
        self.run(&["pull", "--quiet"])?;
        let head = self.run(&["rev-parse", "HEAD"])?;
        Ok(head.trim().to_string())
    }

    /// Full first-parent history of the branch, most-recent-first, with
    /// diff statistics for every commit.
    pub fn all_commits(&self, cache: &mut DiffStatCache) -> Result<Vec<Commit>> {
        self.checkout()?;
        let raw = self.run(&[
            "rev-list",
            "--full-history",
            "--pretty=format:%H,%P,%cn,%ce,%ct",
            "--first-parent",
            "HEAD",
        ])?;

        let mut commits = Vec::new();
        for line in raw.lines() {
            // rev-list prints a `commit <sha>` preamble before each
            // formatted line regardless of the format string.
            if line.trim().is_empty() || line.starts_with("commit") {
                continue;
            }
            let (hexsha, parents, author, email, time) = parse_history_line(line)?;
            let stats = match parents.first() {
                Some(parent) => self.stats(cache, parent, &hexsha)?,
                // Root commit: nothing to diff against.
                None => DiffStats {
                    added: 0,
                    removed: 0,
                    file_count: 0,
                    files: Vec::new(),
                },
            };
            commits.push(Commit {
                hexsha,
                parents,
                author,
                email,
                time,
                ct_added: stats.added,
                ct_removed: stats.removed,
                ct_files: stats.file_count,
                files: stats.files,
                pr_number: None,
                pr_reviewer: None,
            });
        }
        info!(count = commits.len(), branch = %self.branch, "extracted commits");
        Ok(commits)
    }

    pub fn merge_commits(&self, cache: &mut DiffStatCache) -> Result<Vec<Commit>> {
        Ok(filter_merges(&self.all_commits(cache)?))
    }

    pub fn direct_commits(&self, cache: &mut DiffStatCache) -> Result<Vec<Commit>> {
        Ok(filter_direct(&self.all_commits(cache)?))
    }

    /// Diff statistics for `parent..head`, memoized by head SHA.
    fn stats(&self, cache: &mut DiffStatCache, parent: &str, head: &str) -> Result<DiffStats> {
        if let Some(stats) = cache.get(head)? {
            return Ok(stats);
        }
        let raw = self.run(&["diff", "-w", "--numstat", &format!("{}..{}", parent, head)])?;
        let stats = parse_numstat(&raw)?;
        cache.put(head, stats.clone())?;
        Ok(stats)
    }
}

/// Split one formatted rev-list line into its five fields.
fn parse_history_line(line: &str) -> Result<(String, Vec<String>, String, String, i64)> {
    let fields: Vec<&str> = line.split(',').collect();
    let [hexsha, parents, author, email, time] = fields[..] else {
        return Err(GitError::HistoryLine(line.to_string()));
    };
    let time: i64 = time
        .trim()
        .parse()
        .map_err(|_| GitError::HistoryLine(line.to_string()))?;
    let parents: Vec<String> = parents
        .split(' ')
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect();
    Ok((
        hexsha.to_string(),
        parents,
        author.to_string(),
        email.to_string(),
        time,
    ))
}

/// Aggregate a whole `--numstat` output into [`DiffStats`].
fn parse_numstat(raw: &str) -> Result<DiffStats> {
    let mut added = 0u64;
    let mut removed = 0u64;
    let mut files = Vec::new();
    for line in raw.lines() {
        if line.is_empty() {
            continue;
        }
        let caps = RE_NUMSTAT
            .captures(line)
            .ok_or_else(|| GitError::NumstatLine(line.to_string()))?;
        // Binary files count as +1/-0.
        added += match &caps[1] {
            "-" => 1,
            n => n.parse::<u64>()
                .map_err(|_| GitError::NumstatLine(line.to_string()))?,
        };
        removed += match &caps[2] {
            "-" => 0,
            n => n.parse::<u64>()
                .map_err(|_| GitError::NumstatLine(line.to_string()))?,
        };
        files.push(caps[3].to_string());
    }
    Ok(DiffStats {
        added,
        removed,
        file_count: files.len() as u64,
        files,
    })
}

/// Merges into the branch, in the same order as the input.
pub fn filter_merges(commits: &[Commit]) -> Vec<Commit> {
    commits.iter().filter(|c| c.is_merge()).cloned().collect()
}

/// Commits made directly to the branch, in the same order as the input.
pub fn filter_direct(commits: &[Commit]) -> Vec<Commit> {
    commits.iter().filter(|c| c.is_direct()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_line() {
        let line = "a1b2c3,f0f0f0 e1e1e1,Jane Doe,jane@example.com,1714500000";
        let (sha, parents, author, email, time) = parse_history_line(line).unwrap();
        assert_eq!(sha, "a1b2c3");
        assert_eq!(parents, vec!["f0f0f0", "e1e1e1"]);
        assert_eq!(author, "Jane Doe");
        assert_eq!(email, "jane@example.com");
        assert_eq!(time, 1714500000);
    }

    #[test]
    fn test_parse_history_line_root_commit() {
        let line = "a1b2c3,,Jane Doe,jane@example.com,1714500000";
        let (_, parents, _, _, _) = parse_history_line(line).unwrap();
        assert!(parents.is_empty());
    }

    #[test]
    fn test_parse_history_line_wrong_shape_is_fatal() {
        assert!(matches!(
            parse_history_line("a1b2c3,p1,Jane Doe,jane@example.com"),
            Err(GitError::HistoryLine(_))
        ));
        assert!(matches!(
            parse_history_line("a1b2c3,p1,Jane Doe,jane@example.com,notatime"),
            Err(GitError::HistoryLine(_))
        ));
    }

    #[test]
    fn test_parse_numstat() {
        let raw = "10\t2\tsrc/lib.rs\n0\t5\tREADME.md\n";
        let stats = parse_numstat(raw).unwrap();
        assert_eq!(stats.added, 10);
        assert_eq!(stats.removed, 7);
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.files, vec!["src/lib.rs", "README.md"]);
    }

    #[test]
    fn test_parse_numstat_binary_counts_plus_one() {
        let raw = "-\t-\tassets/logo.png\n3\t1\tsrc/main.rs\n";
        let stats = parse_numstat(raw).unwrap();
        assert_eq!(stats.added, 4);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.files, vec!["assets/logo.png", "src/main.rs"]);
    }

    #[test]
    fn test_parse_numstat_empty_diff() {
        let stats = parse_numstat("").unwrap();
        assert_eq!(stats.added, 0);
        assert_eq!(stats.file_count, 0);
    }

    #[test]
    fn test_parse_numstat_garbage_is_fatal() {
        assert!(matches!(
            parse_numstat("what even is this"),
            Err(GitError::NumstatLine(_))
        ));
    }

    #[test]
    fn test_filters_preserve_order() {
        let mk = |sha: &str, parents: &[&str]| Commit {
            hexsha: sha.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            author: "a".to_string(),
            email: "a@example.com".to_string(),
            time: 0,
            ct_added: 0,
            ct_removed: 0,
            ct_files: 0,
            files: vec![],
            pr_number: None,
            pr_reviewer: None,
        };
        let commits = vec![
            mk("c4", &["c3"]),
            mk("c3", &["c2", "side"]),
            mk("c2", &["c1"]),
            mk("c1", &[]),
        ];
        let merges = filter_merges(&commits);
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].hexsha, "c3");

        let direct = filter_direct(&commits);
        let shas: Vec<&str> = direct.iter().map(|c| c.hexsha.as_str()).collect();
        assert_eq!(shas, vec!["c4", "c2"]);
    }

    // End-to-end extraction against a scratch repository. Needs the git
    // binary, which the rest of the crate requires anyway.
    mod with_real_git {
        use super::*;
        use std::process::Command;

        fn git(dir: &Path, args: &[&str]) {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir)
                .env("GIT_AUTHOR_NAME", "Test User")
                .env("GIT_AUTHOR_EMAIL", "test@example.com")
                .env("GIT_COMMITTER_NAME", "Test User")
                .env("GIT_COMMITTER_EMAIL", "test@example.com")
                .status()
                .expect("failed to run git");
            assert!(status.success(), "git {:?} failed", args);
        }

        fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) {
            std::fs::write(dir.join(name), contents).unwrap();
            git(dir, &["add", "."]);
            git(dir, &["commit", "-m", message, "--quiet"]);
        }

        #[test]
        fn test_linear_history_is_all_direct() {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path();
            git(dir, &["init", "--quiet", "-b", "main"]);
            commit_file(dir, "a.txt", "one\n", "first");
            commit_file(dir, "a.txt", "one\ntwo\n", "second");
            commit_file(dir, "b.txt", "three\n", "third");

            let repo = GitRepo::new(dir, "main").unwrap();
            let mut cache = DiffStatCache::in_dir(dir);
            let commits = repo.all_commits(&mut cache).unwrap();

            assert_eq!(commits.len(), 3);
            // Newest first; the root commit has no parents.
            assert!(commits[0].is_direct());
            assert!(commits[1].is_direct());
            assert!(commits[2].parents.is_empty());
            assert!(repo.merge_commits(&mut cache).unwrap().is_empty());
            assert_eq!(repo.direct_commits(&mut cache).unwrap().len(), 2);
            assert_eq!(commits[1].ct_added, 1);
            assert_eq!(commits[1].files, vec!["a.txt"]);
        }

        #[test]
        fn test_merge_commit_second_parent_is_branch_tip() {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path();
            git(dir, &["init", "--quiet", "-b", "main"]);
            commit_file(dir, "a.txt", "base\n", "base");
            git(dir, &["checkout", "-b", "feature", "--quiet"]);
            commit_file(dir, "f.txt", "feature\n", "feature work");
            let feature_tip = {
                let out = Command::new("git")
                    .args(["rev-parse", "HEAD"])
                    .current_dir(dir)
                    .output()
                    .unwrap();
                String::from_utf8(out.stdout).unwrap().trim().to_string()
            };
            git(dir, &["checkout", "main", "--quiet"]);
            git(dir, &["merge", "feature", "--no-ff", "-m", "merge feature", "--quiet"]);

            let repo = GitRepo::new(dir, "main").unwrap();
            let mut cache = DiffStatCache::in_dir(dir);
            let merges = repo.merge_commits(&mut cache).unwrap();
            assert_eq!(merges.len(), 1);
            assert_eq!(merges[0].merge_head(), Some(feature_tip.as_str()));
            // First-parent diff of the merge shows the net change merged in.
            assert_eq!(merges[0].files, vec!["f.txt"]);
        }

        #[test]
        fn test_stats_are_cached_by_head_sha() {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path();
            git(dir, &["init", "--quiet", "-b", "main"]);
            commit_file(dir, "a.txt", "one\n", "first");
            commit_file(dir, "a.txt", "one\ntwo\n", "second");

            let repo = GitRepo::new(dir, "main").unwrap();
            let mut cache = DiffStatCache::in_dir(dir);
            let first = repo.all_commits(&mut cache).unwrap();

            // Second run hits the cache; a poisoned entry proves the diff
            // was not recomputed.
            let head = first[0].hexsha.clone();
            cache
                .put(
                    &head,
                    DiffStats {
                        added: 999,
                        removed: 0,
                        file_count: 1,
                        files: vec!["a.txt".to_string()],
                    },
                )
                .unwrap();
            let second = repo.all_commits(&mut cache).unwrap();
            assert_eq!(second[0].ct_added, 999);
        }
    }
}
