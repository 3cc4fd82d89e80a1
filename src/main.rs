use chrono::{Local, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mergeaudit::cache::DiffStatCache;
use mergeaudit::config::{blank_config, Config};
use mergeaudit::db::Store;
use mergeaudit::git::GitRepo;
use mergeaudit::github::GithubClient;
use mergeaudit::report::{correlate, filter_violations, report_rows, write_csv};
use mergeaudit::sync::{init_pulls, update_pulls};
use mergeaudit::types::Repo;

#[derive(Parser, Debug)]
#[command(name = "mergeaudit")]
#[command(version, about = "Audit a git branch's merge history against GitHub pull requests")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// The json config file
    #[arg(long = "cf", global = true, default_value = "config.json")]
    cf: PathBuf,

    /// Which repo/branch from the config to work on
    #[arg(long, global = true)]
    label: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Limit report output to the last N hours
    #[arg(long, global = true)]
    since: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the correlated commit stream as CSV
    ReportAll,
    /// Print only commits with no identified reviewer
    ListViolations,
    /// Incrementally sync merged pull requests into the store
    UpdatePulls {
        /// Narrow the comment scan with the search API
        #[arg(long)]
        use_search: bool,
    },
    /// Sync all merged pull requests, skipping ones already stored
    InitPulls {
        /// Narrow the comment scan with the search API
        #[arg(long)]
        use_search: bool,
    },
    /// Fast-forward the local clone and print the new HEAD
    UpdateRepo,
    /// List merges into the audited branch
    ListMergeCommits,
    /// List commits made directly to the audited branch
    ListDirectCommits,
    /// List the full first-parent history of the audited branch
    ListAllCommits,
    /// Dump the stored pull set
    ListPulls,
    /// Pretty-print the configured repos
    ListRepos,
    /// Print a starter config file
    BlankConfig,
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mergeaudit=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mergeaudit=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    // blank-config reads nothing, by design: it exists to bootstrap the
    // config file everything else needs.
    if let Command::BlankConfig = args.command {
        println!("{}", blank_config());
        return Ok(());
    }

    let config = Config::load(&args.cf)?;

    if let Command::ListRepos = args.command {
        println!("{}", config.repos_pretty()?);
        return Ok(());
    }

    let repo = config.find_repo(args.label.as_deref())?;

    match &args.command {
        Command::UpdatePulls { use_search } => {
            let store = Store::open_at(&config.paths.database)?;
            let client = GithubClient::new(&config.credentials.github_personal_access_token);
            let count = update_pulls(&store, &client, &repo.gh_owner, &repo.gh_repo, *use_search)?;
            println!("Upserted {} pulls.", count);
        }
        Command::InitPulls { use_search } => {
            let store = Store::open_at(&config.paths.database)?;
            let client = GithubClient::new(&config.credentials.github_personal_access_token);
            let count = init_pulls(&store, &client, &repo.gh_owner, &repo.gh_repo, *use_search)?;
            println!("Upserted {} pulls.", count);
        }
        Command::UpdateRepo => {
            let git = GitRepo::new(&repo.git_dir, &repo.branch)?;
            println!("{}", git.update()?);
        }
        Command::ListMergeCommits => {
            let git = GitRepo::new(&repo.git_dir, &repo.branch)?;
            let mut cache = DiffStatCache::in_dir(git.dir());
            for c in git.merge_commits(&mut cache)? {
                println!("{}, {}, {}", c.hexsha, c.parents.join(" "), c.time);
            }
        }
        Command::ListDirectCommits => {
            let git = GitRepo::new(&repo.git_dir, &repo.branch)?;
            let mut cache = DiffStatCache::in_dir(git.dir());
            for c in git.direct_commits(&mut cache)? {
                print_commit_line(&c);
            }
        }
        Command::ListAllCommits => {
            let git = GitRepo::new(&repo.git_dir, &repo.branch)?;
            let mut cache = DiffStatCache::in_dir(git.dir());
            for c in git.all_commits(&mut cache)? {
                print_commit_line(&c);
            }
        }
        Command::ListPulls => {
            let store = Store::open_at(&config.paths.database)?;
            for pull in store.readall()? {
                println!(
                    "{} {} {} {}",
                    pull.base_sha,
                    pull.head_sha,
                    pull.pull_requester,
                    pull.pull_reviewer.as_deref().unwrap_or("-")
                );
            }
        }
        Command::ReportAll => {
            let commits = correlated_commits(&config, &repo)?;
            write_csv(
                &mut std::io::stdout().lock(),
                report_rows(&commits, args.since, Utc::now()),
            )?;
        }
        Command::ListViolations => {
            let commits = correlated_commits(&config, &repo)?;
            let violations = filter_violations(&commits);
            write_csv(
                &mut std::io::stdout().lock(),
                report_rows(&violations, args.since, Utc::now()),
            )?;
        }
        // Handled before the config-bound commands.
        Command::BlankConfig | Command::ListRepos => {}
    }
    Ok(())
}

/// Extract the branch history and join it with the stored pull set.
fn correlated_commits(
    config: &Config,
    repo: &Repo,
) -> Result<Vec<mergeaudit::types::Commit>, Box<dyn std::error::Error>> {
    let git = GitRepo::new(&repo.git_dir, &repo.branch)?;
    let mut cache = DiffStatCache::in_dir(git.dir());
    let commits = git.all_commits(&mut cache)?;

    let store = Store::open_at(&config.paths.database)?;
    let pulls = store.pulls_for_repo(&repo.gh_owner, &repo.gh_repo)?;
    Ok(correlate(&commits, &pulls))
}

fn print_commit_line(c: &mergeaudit::types::Commit) {
    let when = Local
        .timestamp_opt(c.time, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| c.time.to_string());
    println!(
        "{}, {}, {}, {}, {}",
        c.hexsha,
        c.parents.join(" "),
        when,
        c.author,
        c.email
    );
}
