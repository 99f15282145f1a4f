use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bqlineage_core::{AuditStamp, Config, LineageHierarchy, RunReport, RunState, UrnBuilder};
use bqlineage_datahub::{batch_payload, CatalogEmitter, DatahubRestEmitter};
use bqlineage_engine::{
    lineage_events, FailureNotifier, LineageEmitter, LineageExtractor, LineagePipeline,
    LogNotifier, RunContext, Scheduler, SlackWebhookNotifier,
};
use bqlineage_warehouse::{AuditLogSource, BigQueryAuditSource, LineageQuery, ParamValue};

const DEFAULT_CONFIG_FILE: &str = "bqlineage.toml";

/// bqlineage - BigQuery audit log lineage for DataHub
#[derive(Parser)]
#[command(name = "bqlineage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: bqlineage.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract lineage and emit it to the catalog once
    Run {
        /// Write the run report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Extract the lineage hierarchy and save it
    Extract {
        /// Output file for the hierarchy
        #[arg(short, long, default_value = "lineage-hierarchy.json")]
        output: PathBuf,

        /// Trial run: read at most this many audit rows and print the
        /// hierarchy without saving it
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Emit a saved hierarchy to the catalog
    Emit {
        /// Hierarchy file written by `extract`
        #[arg(short, long)]
        input: PathBuf,

        /// Print the ingest payload instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the lineage query and its parameters
    Query,

    /// Test warehouse and catalog connections
    Check,

    /// Run on the configured schedule
    Schedule {
        /// Stop after this many runs
        #[arg(long)]
        max_runs: Option<usize>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Run { report } => run_command(&config, report.as_deref()).await,
        Commands::Extract { output, limit } => extract_command(&config, &output, limit).await,
        Commands::Emit { input, dry_run } => emit_command(&config, &input, dry_run).await,
        Commands::Query => query_command(&config),
        Commands::Check => check_command(&config).await,
        Commands::Schedule { max_runs } => schedule_command(&config, max_runs).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load the config file, then apply environment overrides
fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let mut config = if let Some(config_path) = path {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
        Config::from_file(Path::new(DEFAULT_CONFIG_FILE))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    config.apply_env_overrides();

    // Relative key files are relative to the config file
    if let Some(credentials) = &config.warehouse.credentials {
        if credentials.is_relative() {
            config.warehouse.credentials = Some(config.project_root.join(credentials));
        }
    }

    tracing::debug!(
        dag_id = %config.dag_id,
        project = %config.warehouse.project_id,
        connection = %config.catalog.connection,
        "config loaded"
    );

    Ok(config)
}

async fn build_source(config: &Config) -> Result<Arc<dyn AuditLogSource>> {
    let source = BigQueryAuditSource::from_config(&config.warehouse)
        .await
        .context("Failed to create BigQuery client")?;
    Ok(Arc::new(source))
}

fn build_catalog(config: &Config) -> Result<Arc<dyn CatalogEmitter>> {
    let emitter = DatahubRestEmitter::from_config(&config.catalog)
        .context("Failed to create DataHub emitter")?;
    Ok(Arc::new(emitter))
}

fn build_notifier(config: &Config) -> Result<Arc<dyn FailureNotifier>> {
    match &config.notifications.slack_webhook_url {
        Some(url) => Ok(Arc::new(SlackWebhookNotifier::new(url)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

async fn build_pipeline(config: &Config) -> Result<LineagePipeline> {
    let extractor = LineageExtractor::new(
        build_source(config).await?,
        LineageQuery::from_config(&config.warehouse),
    );
    let emitter = LineageEmitter::from_config(build_catalog(config)?, config)?;

    Ok(LineagePipeline::new(&config.dag_id, &config.owner, extractor, emitter)
        .with_notifier(build_notifier(config)?))
}

/// Run command - one full extract and emit
async fn run_command(config: &Config, report_path: Option<&Path>) -> Result<()> {
    config.validate()?;

    let pipeline = build_pipeline(config).await?;
    let report = pipeline.run(RunContext::manual()).await;

    if let Some(path) = report_path {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("{} {}", "Run report saved to:".green(), path.display());
    }

    print_run_summary(&report);

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

/// Extract command - write the hierarchy to a file
///
/// A row-limited extraction is a trial: its hierarchy is printed but never
/// saved, so it cannot be emitted later.
async fn extract_command(config: &Config, output: &Path, limit: Option<u64>) -> Result<()> {
    let mut query = LineageQuery::from_config(&config.warehouse);
    if let Some(limit) = limit {
        query = query.with_max_rows(limit);
    }

    let extractor = LineageExtractor::new(build_source(config).await?, query);
    let extraction = extractor.extract().await?;

    print_hierarchy(&extraction.hierarchy);
    println!();
    println!(
        "{} {} rows, {} downstream tables, {} edges",
        "Extracted".green().bold(),
        extraction.rows_fetched,
        extraction.hierarchy.len(),
        extraction.hierarchy.edge_count()
    );

    if let Some(limit) = limit {
        println!(
            "{} limited to {} rows, hierarchy not saved",
            "Trial run:".yellow(),
            limit
        );
        return Ok(());
    }

    extraction
        .hierarchy
        .save_to_file(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{} {}", "Hierarchy saved to:".green(), output.display());

    Ok(())
}

/// Emit command - send a saved hierarchy
async fn emit_command(config: &Config, input: &Path, dry_run: bool) -> Result<()> {
    // URNs are built from the project id, so it must be usable even offline
    let urns = UrnBuilder::from_config(config).context("Cannot build dataset URNs")?;

    let hierarchy = LineageHierarchy::from_file(input)
        .with_context(|| format!("Failed to read hierarchy from {}", input.display()))?;

    if dry_run {
        println!("{}", dry_run_payload(&urns, &hierarchy, &config.catalog.audit_actor)?);
        return Ok(());
    }

    let emitter = LineageEmitter::new(build_catalog(config)?, urns, &config.catalog.audit_actor);
    let accepted = emitter.emit(&hierarchy).await?;

    println!(
        "{} {} lineage events to {}",
        "Emitted".green().bold(),
        accepted,
        emitter.connection_id()
    );

    Ok(())
}

/// Ingest payload for a hierarchy, rendered without a catalog connection
fn dry_run_payload(urns: &UrnBuilder, hierarchy: &LineageHierarchy, actor: &str) -> Result<String> {
    let events = lineage_events(urns, hierarchy);
    let payload = batch_payload(&events, &AuditStamp::now(actor));
    Ok(serde_json::to_string_pretty(&payload)?)
}

/// Query command - show what would run in BigQuery
fn query_command(config: &Config) -> Result<()> {
    let query = LineageQuery::from_config(&config.warehouse);
    let sql = query.render_sql()?;

    println!("{}", sql);
    println!();
    println!("{}", "Parameters:".cyan().bold());
    for param in query.parameters() {
        let value = match &param.value {
            ParamValue::String(value) => format!("{:?}", value),
            ParamValue::StringArray(values) => format!("{:?}", values),
        };
        println!("  @{} = {}", param.name, value);
    }

    Ok(())
}

/// Check command - test both connections
async fn check_command(config: &Config) -> Result<()> {
    config.validate()?;

    let mut failed = false;

    let source = build_source(config).await;
    let warehouse = match source {
        Ok(source) => source.test_connection().await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    failed |= print_check(&format!("warehouse ({})", config.warehouse.project_id), warehouse);

    let catalog = match build_catalog(config) {
        Ok(catalog) => catalog.test_connection().await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    failed |= print_check(&format!("catalog ({})", config.catalog.connection), catalog);

    if failed {
        std::process::exit(1);
    }

    Ok(())
}

/// Schedule command - cadence loop
async fn schedule_command(config: &Config, max_runs: Option<usize>) -> Result<()> {
    config.validate()?;

    let scheduler = Scheduler::new(build_pipeline(config).await?, config.schedule);
    eprintln!("{} {} ({})", "Scheduling".cyan(), config.dag_id, config.schedule);

    let mut failures = 0;
    let runs = scheduler
        .run_loop(max_runs, |report| {
            if !report.is_success() {
                failures += 1;
            }
            print_run_summary(report);
        })
        .await;

    println!("{} runs finished, {} failed", runs, failures);
    Ok(())
}

/// Print one check line; returns true on failure
fn print_check(label: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            println!("{} {}", "✓".green(), label);
            false
        }
        Err(e) => {
            println!("{} {}: {:#}", "✗".red(), label, e);
            true
        }
    }
}

fn print_hierarchy(hierarchy: &LineageHierarchy) {
    for (downstream, upstreams) in hierarchy.iter() {
        println!("{}", downstream.to_string().bold());
        for upstream in upstreams {
            println!("  <- {}", upstream);
        }
    }
}

/// Print run summary to console
fn print_run_summary(report: &RunReport) {
    println!();
    println!("{}", "=".repeat(60).bright_blue());
    println!("{}", "Lineage Run".bright_blue().bold());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
    println!("Run:   {}", report.run_id);

    let state = match report.state {
        RunState::Succeeded => report.state.as_str().green().bold(),
        RunState::Failed => report.state.as_str().red().bold(),
        _ => report.state.as_str().yellow().bold(),
    };
    println!("State: {}", state);
    println!();

    println!("  Audit rows:        {}", report.summary.rows_fetched);
    println!("  Downstream tables: {}", report.summary.downstream_tables);
    println!("  Upstream edges:    {}", report.summary.upstream_edges);
    println!("  Events emitted:    {}", report.summary.events_emitted);

    if let Some(digest) = &report.hierarchy_digest {
        println!("  Hierarchy digest:  {}", digest);
    }

    if let Some(error) = &report.error {
        println!();
        println!(
            "{} {} during {}",
            "✗".red(),
            error.kind.red().bold(),
            error.stage.as_str()
        );
        println!("  {}", error.message);
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}
