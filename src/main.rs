//! PR Watcher - pull request statistics for AI coding agents
//!
//! Counts the pull requests opened by a fixed set of AI coding agents via
//! the GitHub search API, derives merge rates, appends one snapshot per
//! run to a history file and renders a report.
//!
//! Exit codes:
//!   0 - Success (complete run, or partial run without --strict)
//!   1 - Runtime error or aborted run (nothing appended)
//!   2 - Partial run with --strict

mod analysis;
mod cli;
mod config;
mod history;
mod models;
mod orchestrator;
mod registry;
mod report;
mod search;

use analysis::SnapshotSummary;
use anyhow::{bail, Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use history::HistoryStore;
use models::{AgentSpec, Snapshot};
use orchestrator::{Orchestrator, RunState};
use search::{CountExecutor, GitHubSearch, RateBudget, RetryPolicy};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("PR Watcher v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        "Arguments: {:?}",
        Args {
            token: args.token.as_ref().map(|_| "[REDACTED]".to_string()),
            ..args.clone()
        }
    );

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .pr-watcher.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to change the history path, search budget or tracked agents.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Dispatch to the selected mode. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let specs = registry::specs_with(&config.agents);
    registry::validate(&specs).context("Invalid agent registry")?;

    if args.dry_run {
        return handle_dry_run(&specs, &config);
    }

    let mut store = HistoryStore::open(&config.general.history_path)
        .with_context(|| format!("Failed to open history {}", config.general.history_path))?;
    if let Some(corruption) = store.corruption() {
        println!(
            "⚠️  History has an invalid tail at line {} ({} bytes); it will be dropped on the next append.",
            corruption.line, corruption.discarded_bytes
        );
    }

    if let Some(ref csv_path) = args.import_csv {
        let summary = history::import::import_legacy_csv(csv_path, &specs, &mut store)?;
        println!(
            "✅ Imported {} snapshots ({}), skipped {} rows.",
            summary.imported, summary.methodology, summary.skipped
        );
        export_trend(&args, &store)?;
        return Ok(0);
    }

    if args.report_only {
        let Some(latest) = store.latest() else {
            bail!("History {} has no snapshots", store.path().display());
        };
        write_report(latest, args.format, &config.general.report_output)?;
        export_trend(&args, &store)?;
        println!("✅ Report saved to: {}", config.general.report_output);
        return Ok(0);
    }

    let state = collect_and_commit(&args, &config, specs, &mut store).await?;
    export_trend(&args, &store)?;

    Ok(match state {
        RunState::Aborted => 1,
        RunState::Partial if args.strict => {
            eprintln!("\n⛔ Some agents are incomplete. Failing (exit code 2).");
            2
        }
        _ => 0,
    })
}

/// Run one collection pass, append it and write the report.
async fn collect_and_commit(
    args: &Args,
    config: &Config,
    specs: Vec<AgentSpec>,
    store: &mut HistoryStore,
) -> Result<RunState> {
    let search = &config.search;
    let oracle = GitHubSearch::new(
        &search.api_url,
        args.token.clone(),
        &search.user_agent,
        Duration::from_secs(search.timeout_seconds),
    )?;
    let rpm = search.effective_requests_per_minute(oracle.is_authenticated());

    println!("🔎 Collecting PR counts for {} agents...", specs.len());
    println!("   API: {}", search.api_url);
    println!(
        "   Budget: {} requests/min{}",
        rpm,
        if oracle.is_authenticated() { " (authenticated)" } else { "" }
    );
    println!("   Methodology: {}", config.general.methodology.describe());

    let budget = Arc::new(RateBudget::per_minute(rpm));
    let executor = CountExecutor::new(
        Arc::new(oracle),
        Arc::clone(&budget),
        RetryPolicy {
            max_attempts: search.max_attempts,
            initial_backoff: Duration::from_millis(search.initial_backoff_ms),
            max_backoff: Duration::from_millis(search.max_backoff_ms),
        },
        search.concurrency,
    )
    .with_progress(!args.quiet);

    let mut orchestrator = Orchestrator::new(specs, executor, config.general.methodology);

    // The history is only written in `commit`, after collection finished.
    let deadline = Duration::from_secs(config.general.run_timeout_seconds);
    let snapshot = tokio::select! {
        collected = tokio::time::timeout(deadline, orchestrator.collect()) => match collected {
            Ok(snapshot) => snapshot,
            Err(_) => bail!(
                "Run exceeded its {}s deadline; nothing was appended",
                deadline.as_secs()
            ),
        },
        _ = tokio::signal::ctrl_c() => bail!("Interrupted; nothing was appended"),
    };

    let result = orchestrator.commit(snapshot, store);

    let status = budget.status().await;
    debug!(remaining = ?status.remaining, reset_at = ?status.reset_at, "Search budget after run");

    if result.is_aborted() {
        if let Some(ref reason) = result.abort_reason {
            eprintln!("\n❌ Run aborted: {}. History unchanged.", reason);
        }
        return Ok(orchestrator.state());
    }

    write_report(&result.snapshot, args.format, &config.general.report_output)?;
    print_summary(&result.snapshot);

    info!("Complete agents: {}", result.succeeded_agents.join(", "));
    if !result.failed_agents.is_empty() {
        warn!("Incomplete agents: {}", result.failed_agents.join(", "));
    }
    println!(
        "\n✅ Run {}! Snapshot #{} appended to {}; report saved to {}",
        result.state,
        store.len(),
        store.path().display(),
        config.general.report_output
    );

    Ok(orchestrator.state())
}

/// Handle --dry-run: print the query plan, exit.
fn handle_dry_run(specs: &[AgentSpec], config: &Config) -> Result<i32> {
    println!("\n🔍 Dry run: query plan (no API calls)...\n");

    let mut queries = 0;
    for spec in specs {
        println!("   {} ({})", spec.display_name, spec.key);
        for predicate in &spec.predicates {
            println!("     {:<7} {}", predicate.category.to_string(), predicate.query);
            queries += 1;
        }
    }

    println!(
        "\n   Total: {} agents, {} queries, methodology {}",
        specs.len(),
        queries,
        config.general.methodology
    );
    println!("\n✅ Dry run complete. No API calls were made.");
    Ok(0)
}

/// Render the snapshot in the requested format and write it.
fn write_report(snapshot: &Snapshot, format: OutputFormat, path: &str) -> Result<()> {
    let output = match format {
        OutputFormat::Json => report::generate_json_report(snapshot)?,
        OutputFormat::Markdown => report::generate_markdown_report(snapshot),
    };

    std::fs::write(path, &output).with_context(|| format!("Failed to write report to {}", path))
}

/// Write the trend CSV when --trend is set.
fn export_trend(args: &Args, store: &HistoryStore) -> Result<()> {
    let Some(ref path) = args.trend else {
        return Ok(());
    };

    let points = history::trend_points(store.all(), args.trend_window);
    history::write_trend_csv(&points, path)?;
    println!("📈 Trend data ({} points) saved to: {}", points.len(), path.display());
    Ok(())
}

fn print_summary(snapshot: &Snapshot) {
    let summary = SnapshotSummary::from_snapshot(snapshot);

    println!("\n📊 Run Summary:");
    for agent in &snapshot.agents {
        let rate = agent
            .rate
            .percent()
            .map(|r| format!("{:.2}%", r))
            .unwrap_or_else(|| "n/a".to_string());
        let flag = if !agent.has_data() {
            " (no data)"
        } else if !agent.is_complete() {
            " (partial)"
        } else {
            ""
        };
        println!("   {:<10} {:>8}{}", agent.display_name, rate, flag);
    }
    println!(
        "   Complete: {} | Incomplete: {} (no data: {}) | Approximate: {} | Inconsistent: {}",
        summary.complete,
        summary.incomplete,
        summary.no_data,
        summary.approximate,
        summary.inconsistent
    );
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
