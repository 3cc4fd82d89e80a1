//! Configuration file support
//!
//! Reads the JSON config document (default `config.json`): credentials,
//! database path, and the list of audited repos. The config is consumed,
//! never written; `blank_config()` produces a starter document for users
//! to fill in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Repo;

/// Error type for configuration loading and lookup
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// `--label` was required but not given.
    MissingLabel,
    /// `--label` named a repo not present in the config.
    UnknownLabel(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Malformed config file: {}", e),
            ConfigError::MissingLabel => {
                write!(f, "You must choose a repo from the config with --label")
            }
            ConfigError::UnknownLabel(label) => {
                write!(f, "No repo labeled '{}' in the config", label)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub paths: Paths,
    pub repos: Vec<RepoEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Credentials {
    pub github_personal_access_token: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Paths {
    /// SQLite database holding pulls and the comment audit trail.
    pub database: PathBuf,
}

/// One audited repo as written in the config file
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RepoEntry {
    pub label: String,
    pub github_owner: String,
    pub github_repo: String,
    pub git_repo_dir: PathBuf,
    pub branch: String,
}

impl From<&RepoEntry> for Repo {
    fn from(entry: &RepoEntry) -> Self {
        Repo {
            label: entry.label.clone(),
            gh_owner: entry.github_owner.clone(),
            gh_repo: entry.github_repo.clone(),
            git_dir: entry.git_repo_dir.clone(),
            branch: entry.branch.clone(),
        }
    }
}

impl Config {
    /// Load config from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve `--label` to a configured repo
    pub fn find_repo(&self, label: Option<&str>) -> Result<Repo> {
        let label = label.ok_or(ConfigError::MissingLabel)?;
        self.repos
            .iter()
            .find(|r| r.label == label)
            .map(Repo::from)
            .ok_or_else(|| ConfigError::UnknownLabel(label.to_string()))
    }

    /// Pretty-printed JSON of the configured repos (for `list-repos`)
    pub fn repos_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.repos)?)
    }
}

/// Starter config document printed by `blank-config`.
pub fn blank_config() -> String {
    let config = Config {
        credentials: Credentials {
            github_personal_access_token: "xxx".to_string(),
        },
        paths: Paths {
            database: PathBuf::from("data/mergeaudit.db"),
        },
        repos: vec![RepoEntry {
            label: "grvtest-master".to_string(),
            github_owner: "jondb".to_string(),
            github_repo: "grvtest".to_string(),
            git_repo_dir: PathBuf::from("data/grvtest"),
            branch: "master".to_string(),
        }],
    };
    // Serializing a literal cannot fail.
    serde_json::to_string_pretty(&config).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "credentials": { "github_personal_access_token": "tok" },
        "paths": { "database": "data/audit.db" },
        "repos": [
            {
                "label": "widgets-main",
                "github_owner": "octo",
                "github_repo": "widgets",
                "git_repo_dir": "data/widgets",
                "branch": "main"
            }
        ]
    }"#;

    #[test]
    fn test_parse_config() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.credentials.github_personal_access_token, "tok");
        assert_eq!(config.paths.database, PathBuf::from("data/audit.db"));
        assert_eq!(config.repos.len(), 1);
        assert_eq!(config.repos[0].branch, "main");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.repos[0].label, "widgets-main");
    }

    #[test]
    fn test_find_repo() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        let repo = config.find_repo(Some("widgets-main")).unwrap();
        assert_eq!(repo.gh_owner, "octo");
        assert_eq!(repo.gh_repo, "widgets");

        match config.find_repo(Some("nope")) {
            Err(ConfigError::UnknownLabel(l)) => assert_eq!(l, "nope"),
            other => panic!("expected UnknownLabel, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(
            config.find_repo(None),
            Err(ConfigError::MissingLabel)
        ));
    }

    #[test]
    fn test_blank_config_round_trips() {
        let blank = blank_config();
        let config: Config = serde_json::from_str(&blank).unwrap();
        assert_eq!(config.repos.len(), 1);
        assert!(!config.credentials.github_personal_access_token.is_empty());
    }

    #[test]
    fn test_malformed_config_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
