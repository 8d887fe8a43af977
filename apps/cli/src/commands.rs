//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use pagewatch_fetch::Fetcher;
use pagewatch_pipeline::{Broker, MemoryBroker, Message, Stages};
use pagewatch_scoring::{ScoringPolicy, compare};
use pagewatch_shared::{
    AppConfig, Job, JobId, JobStatus, Run, RunStatus, init_config, load_config,
};
use pagewatch_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PageWatch — track web pages and score how much they change.
#[derive(Parser)]
#[command(
    name = "pagewatch",
    version,
    about = "Track web pages, keep versioned snapshots, and score every change.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Track a new URL.
    Add {
        /// URL to track.
        url: String,

        /// Human-readable name (defaults to URL hostname).
        #[arg(short, long)]
        name: Option<String>,

        /// Schedule descriptor, stored as-is (e.g. "manual", a cron line).
        #[arg(short, long, default_value = "manual")]
        schedule: String,
    },

    /// List tracked jobs.
    List,

    /// Pause a job; paused jobs refuse new runs.
    Pause {
        /// Job ID or name.
        job: String,
    },

    /// Resume a paused job.
    Resume {
        /// Job ID or name.
        job: String,
    },

    /// Execute one pipeline run for a job and print its outcome.
    Run {
        /// Job ID or name.
        job: String,

        /// Override the run deadline, in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show runs, snapshot versions, and change history for a job.
    History {
        /// Job ID or name.
        job: String,
    },

    /// Compare any two stored snapshot versions of a job.
    Compare {
        /// Job ID or name.
        job: String,

        /// Older version.
        #[arg(long)]
        from: u32,

        /// Newer version.
        #[arg(long)]
        to: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagewatch=info",
        1 => "pagewatch=debug",
        _ => "pagewatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Add { url, name, schedule } => cmd_add(&url, name.as_deref(), &schedule).await,
        Command::List => cmd_list().await,
        Command::Pause { job } => cmd_set_status(&job, JobStatus::Paused).await,
        Command::Resume { job } => cmd_set_status(&job, JobStatus::Active).await,
        Command::Run { job, timeout } => cmd_run(&job, timeout).await,
        Command::History { job } => cmd_history(&job).await,
        Command::Compare { job, from, to } => cmd_compare(&job, from, to).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// Open the snapshot database at the configured data directory.
async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let db_path = expand_home(&config.defaults.data_dir).join("pagewatch.db");
    Ok(Storage::open(&db_path).await?)
}

/// Resolve a job argument as an ID first, then as an exact name match.
async fn resolve_job(storage: &Storage, arg: &str) -> Result<Job> {
    if let Ok(id) = arg.parse::<JobId>() {
        if let Some(job) = storage.get_job(id).await? {
            return Ok(job);
        }
    }

    let jobs = storage.list_jobs().await?;
    jobs.into_iter()
        .find(|j| j.name == arg)
        .ok_or_else(|| eyre!("no job matches '{arg}' (try `pagewatch list`)"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_add(url: &str, name: Option<&str>, schedule: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let job_name = name
        .map(String::from)
        .unwrap_or_else(|| parsed.host_str().unwrap_or("unknown").to_string());

    let job = Job {
        id: JobId::new(),
        url: parsed.to_string(),
        name: job_name.clone(),
        schedule: schedule.to_string(),
        status: JobStatus::Active,
        created_at: chrono::Utc::now(),
    };
    storage.insert_job(&job).await?;

    info!(url, name = %job_name, "job created");
    println!("Tracking {url}");
    println!("  ID:   {}", job.id);
    println!("  Name: {job_name}");
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let jobs = storage.list_jobs().await?;
    if jobs.is_empty() {
        println!("No tracked jobs. Add one with `pagewatch add <url>`.");
        return Ok(());
    }

    for job in jobs {
        let stats = storage.job_stats(job.id).await?;
        println!(
            "{}  [{}]  {}  ({} versions)  {}",
            job.id,
            job.status.as_str(),
            job.name,
            stats.total_versions,
            job.url,
        );
    }
    Ok(())
}

async fn cmd_set_status(job_arg: &str, status: JobStatus) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let job = resolve_job(&storage, job_arg).await?;

    storage.set_job_status(job.id, status).await?;
    println!("{} is now {}", job.name, status.as_str());
    Ok(())
}

async fn cmd_run(job_arg: &str, timeout: Option<u64>) -> Result<()> {
    let config = load_config()?;
    let storage = Arc::new(open_storage(&config).await?);
    let job = resolve_job(&storage, job_arg).await?;

    if job.status != JobStatus::Active {
        return Err(eyre!("job '{}' is paused", job.name));
    }

    let timeout_secs = timeout.unwrap_or(config.defaults.run_timeout_secs);
    let run = Run::with_timeout(job.id, chrono::Duration::seconds(timeout_secs as i64));
    storage.insert_run(&run).await?;

    let fetcher = Fetcher::new(&config.fetch)?;
    let policy = ScoringPolicy::from_config(&config.scoring);
    let stages = Stages::new(
        storage.clone(),
        fetcher,
        policy,
        config.defaults.max_fetch_attempts,
    );
    let broker = MemoryBroker::new();

    broker
        .publish(Message::StartFetch {
            job_id: job.id,
            run_id: run.id,
            url: job.url.clone(),
        })
        .await?;

    info!(job = %job.name, run_id = %run.id, "run started");
    let spinner = progress_spinner();
    spinner.set_message(format!("Checking {}", job.url));
    let drive_result = stages.drive(&broker).await;
    spinner.finish_and_clear();
    drive_result?;

    let finished = storage
        .get_run(run.id)
        .await?
        .ok_or_else(|| eyre!("run {} disappeared", run.id))?;

    println!();
    match finished.status {
        RunStatus::Completed => {
            println!("  Run completed.");
            match (finished.analysis_score, finished.analysis_label) {
                (Some(score), Some(label)) => {
                    println!("  Change score: {score:.3} ({label})");
                }
                _ => println!("  First version captured; nothing to compare yet."),
            }
        }
        RunStatus::Failed => {
            println!("  Run failed.");
            if let Some(reason) = &finished.failure_reason {
                println!("  Reason: {reason}");
            }
        }
        RunStatus::Pending => {
            // Unreachable after a clean drive; surface it rather than hide it.
            println!("  Run is still pending — pipeline did not finish.");
        }
    }
    println!();
    Ok(())
}

async fn cmd_history(job_arg: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let job = resolve_job(&storage, job_arg).await?;

    println!("{} — {}", job.name, job.url);
    println!();

    let versions = storage.list_snapshot_versions(job.id).await?;
    println!("Versions:");
    if versions.is_empty() {
        println!("  (none)");
    }
    for (version, created_at, title) in &versions {
        let title = if title.is_empty() { "(untitled)" } else { title };
        println!("  v{version}  {}  {title}", created_at.to_rfc3339());
    }
    println!();

    let changes = storage.list_changes_for_job(job.id).await?;
    println!("Changes:");
    if changes.is_empty() {
        println!("  (none)");
    }
    for change in &changes {
        println!(
            "  v{} -> v{}  score {:.3}  {}",
            change.previous_version, change.current_version, change.score, change.label,
        );
    }
    println!();

    let runs = storage.list_runs_for_job(job.id).await?;
    println!("Runs:");
    if runs.is_empty() {
        println!("  (none)");
    }
    for run in &runs {
        let detail = match run.status {
            RunStatus::Failed => run.failure_reason.clone().unwrap_or_default(),
            _ => run
                .analysis_status
                .map(|s| format!("analysis {}", s.as_str()))
                .unwrap_or_default(),
        };
        println!(
            "  {}  {}  {}",
            run.started_at.to_rfc3339(),
            run.status.as_str(),
            detail,
        );
    }
    println!();

    let stats = storage.job_stats(job.id).await?;
    if !stats.label_counts.is_empty() {
        let counts: Vec<String> = stats
            .label_counts
            .iter()
            .map(|(label, count)| format!("{label} {count}"))
            .collect();
        println!("Change labels: {}", counts.join(", "));
    }
    if let Some(avg) = stats.avg_score {
        println!("Average change score: {avg:.3}");
    }
    if let (Some(first), Some(last)) = (stats.first_run_at, stats.last_run_at) {
        println!(
            "Runs from {} to {}",
            first.to_rfc3339(),
            last.to_rfc3339()
        );
    }
    Ok(())
}

async fn cmd_compare(job_arg: &str, from: u32, to: u32) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let job = resolve_job(&storage, job_arg).await?;

    let older = storage
        .get_snapshot(job.id, &job.url, from)
        .await?
        .ok_or_else(|| eyre!("no snapshot v{from} for '{}'", job.name))?;
    let newer = storage
        .get_snapshot(job.id, &job.url, to)
        .await?
        .ok_or_else(|| eyre!("no snapshot v{to} for '{}'", job.name))?;

    let policy = ScoringPolicy::from_config(&config.scoring);
    let diff = compare(&policy, &older.facets, &newer.facets);

    println!("{} — v{from} vs v{to}", job.name);
    println!("  Score: {:.3} ({})", diff.score, diff.label);
    if diff.title_changed {
        println!("  Title: {:?} -> {:?}", older.facets.title, newer.facets.title);
    }
    if diff.description_changed {
        println!("  Description changed.");
    }

    print_words("Added words", &diff.added_words);
    print_words("Removed words", &diff.removed_words);

    if !diff.added_links.is_empty() {
        println!("  Added links:");
        for link in &diff.added_links {
            println!("    + {}", link.href);
        }
    }
    if !diff.removed_links.is_empty() {
        println!("  Removed links:");
        for link in &diff.removed_links {
            println!("    - {}", link.href);
        }
    }
    if !diff.modified_links.is_empty() {
        println!("  Modified links:");
        for link in &diff.modified_links {
            println!(
                "    ~ {}  {:?} -> {:?}",
                link.href, link.before_text, link.after_text
            );
        }
    }
    Ok(())
}

/// Print a word list, truncated so massive diffs stay readable.
fn print_words(heading: &str, words: &[String]) {
    const MAX_SHOWN: usize = 20;
    if words.is_empty() {
        return;
    }
    let shown: Vec<&str> = words.iter().take(MAX_SHOWN).map(String::as_str).collect();
    let suffix = if words.len() > MAX_SHOWN {
        format!(" … ({} total)", words.len())
    } else {
        String::new()
    };
    println!("  {heading}: {}{suffix}", shown.join(", "));
}

fn progress_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
