mod config;
mod status;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{BridgeConfig, EnvOverrides};
use extract::validate_relationships;
use index::{
    BatchSelection, Bridge, CheckpointManager, GraphSink, MemorySink, Neo4jSink, ProgressTracker,
    RunResult, RunStatus, plan_batches,
};
use status::StatusState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Load LightRAG extraction output into Neo4j.
#[derive(Parser)]
#[command(name = "lightrag-bridge", version)]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize, deduplicate and write to the graph store.
    Run(RunArgs),
    /// Report what a run would write, without touching any store.
    Inspect(InspectArgs),
}

#[derive(Args)]
struct RunArgs {
    /// LightRAG output files or working directories.
    #[arg(long, short, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_retries: Option<usize>,

    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Where the run report is written (and read by --retry-failed).
    #[arg(long)]
    report: Option<PathBuf>,

    /// Only re-attempt the batches that failed in the last report.
    #[arg(long, conflicts_with = "fresh")]
    retry_failed: bool,

    /// Discard the checkpoint and start over.
    #[arg(long)]
    fresh: bool,

    /// Write into an in-memory graph instead of Neo4j.
    #[arg(long)]
    dry_run: bool,

    /// Serve /health, /progress and /result on this address.
    #[arg(long, value_name = "ADDR")]
    serve: Option<String>,
}

#[derive(Args)]
struct InspectArgs {
    #[arg(long, short, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Orphan relationships to list.
    #[arg(long, default_value_t = 20)]
    show_orphans: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Inspect(args) => inspect(args).await,
    }
}

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("failed to set subscriber: {e}"))
}

fn load_config(path: Option<&std::path::Path>) -> Result<BridgeConfig> {
    BridgeConfig::load(path, &EnvOverrides::from_env())
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        config.batch.batch_size = batch_size;
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(path) = args.checkpoint {
        config.checkpoint.path = path;
    }
    if let Some(path) = args.report {
        config.checkpoint.report_path = path;
    }
    if args.serve.is_some() {
        config.status.listen = args.serve;
    }
    config.validate()?;

    // A dry run keeps its own checkpoint and report so it never marks real
    // batches as written.
    let (checkpoint_path, report_path) = if args.dry_run {
        (
            config.checkpoint.path.with_extension("dry-run.json"),
            config.checkpoint.report_path.with_extension("dry-run.json"),
        )
    } else {
        (config.checkpoint.path.clone(), config.checkpoint.report_path.clone())
    };

    let mut checkpoint = CheckpointManager::load(&checkpoint_path)
        .await
        .context("failed to load checkpoint")?;
    if args.fresh || args.dry_run {
        checkpoint.reset().await.context("failed to reset checkpoint")?;
    }

    let selection = if args.retry_failed {
        let previous = RunResult::load(&report_path)
            .await
            .context("--retry-failed needs the report of an earlier run")?;
        let failed = previous.failed_batch_ids();
        if failed.is_empty() {
            info!(report = %report_path.display(), "Last run had no failed batches, nothing to retry");
            return Ok(());
        }
        info!(batches = failed.len(), "Retrying failed batches");
        BatchSelection::Only(failed)
    } else {
        BatchSelection::Pending
    };

    let progress = ProgressTracker::new();
    progress.on_batch(|summary| {
        info!(
            entities = %format!("{}/{}", summary.entities_processed, summary.entities_total),
            relationships = %format!(
                "{}/{}",
                summary.relationships_processed, summary.relationships_total
            ),
            failed = summary.batches_failed,
            records_per_second = %format!("{:.1}", summary.records_per_second),
            "Progress"
        );
    });

    let status_state = StatusState::new(Arc::clone(&progress));
    if let Some(addr) = config.status.listen.clone() {
        let state = status_state.clone();
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, state).await {
                warn!(error = %e, "Status server stopped");
            }
        });
    }

    let result = if args.dry_run {
        info!("Dry run: writing to an in-memory graph");
        execute(MemorySink::new(), &config, progress, &args.input, &mut checkpoint, &selection).await?
    } else {
        let sink = Neo4jSink::connect(&config.neo4j.uri, &config.neo4j.user, &config.neo4j.password)
            .await
            .context("failed to connect to Neo4j")?;
        sink.ping().await.context("Neo4j is not answering queries")?;
        sink.init_schema().await.context("failed to create Neo4j schema")?;
        execute(sink, &config, progress, &args.input, &mut checkpoint, &selection).await?
    };

    result
        .save(&report_path)
        .await
        .context("failed to write run report")?;
    print_result(&result, &report_path);

    if config.status.listen.is_some() {
        status_state.publish(result).await;
        info!("Run finished; status server still up, Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn execute<S: GraphSink>(
    sink: S,
    config: &BridgeConfig,
    progress: Arc<ProgressTracker>,
    input: &[PathBuf],
    checkpoint: &mut CheckpointManager,
    selection: &BatchSelection,
) -> Result<RunResult> {
    let bridge = Bridge::new(sink, config.bridge_options(), progress)
        .with_deduplicator(config.deduplicator());
    let result = bridge.run_paths(input, checkpoint, selection).await?;
    Ok(result)
}

fn print_result(result: &RunResult, report_path: &std::path::Path) {
    let s = &result.summary;
    println!("Run {} finished: {:?}", result.run_id, result.status);
    println!(
        "  entities:      {}/{} ({} merged as duplicates)",
        s.entities_processed, s.entities_total, s.entities_merged
    );
    println!(
        "  relationships: {}/{} ({} orphaned, not written)",
        s.relationships_processed, s.relationships_total, s.relationships_orphaned
    );
    println!(
        "  batches:       {} committed, {} already done, {} failed, {} retried",
        s.batches_completed, s.batches_skipped, s.batches_failed, s.batches_retried
    );
    if let Some(stats) = &result.verification {
        println!(
            "  store now has {} entities and {} relationships",
            stats.entity_count, stats.relation_count
        );
    }
    println!("  elapsed {:.1}s, report at {}", s.elapsed_secs, report_path.display());

    if result.status == RunStatus::CompletedWithErrors {
        println!("Failed batches (re-run with --retry-failed):");
        for batch in result.failed_batches() {
            if let index::BatchOutcome::Failed {
                attempts,
                error_kind,
                message,
            } = &batch.outcome
            {
                println!(
                    "  {} ({} records, {:?} after {} attempts): {}",
                    batch.batch_id, batch.records, error_kind, attempts, message
                );
            }
        }
    }
}

async fn inspect(args: InspectArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;

    let records = ingest::load_paths(&args.input).await?;
    let (raw_entities, raw_relationships) = (records.entity_count(), records.relationship_count());

    let outcome = config.deduplicator().deduplicate(records);
    let (records, orphaned) = validate_relationships(outcome.records);
    let batches = plan_batches(&records, config.batch.batch_size);

    println!("Entities:      {raw_entities} read, {} after dedup", records.entity_count());
    println!(
        "Relationships: {raw_relationships} read, {} merged, {} orphaned, {} to write",
        outcome.merged_relationships,
        orphaned.len(),
        records.relationship_count()
    );
    println!(
        "Batches:       {} of at most {} records",
        batches.len(),
        config.batch.batch_size
    );
    if !outcome.remap.is_empty() {
        println!("Merged ids:");
        for (from, to) in &outcome.remap {
            println!("  {from} -> {to}");
        }
    }
    if !orphaned.is_empty() {
        println!("Orphan relationships:");
        for rel in orphaned.iter().take(args.show_orphans) {
            println!("  {} -[{}]-> {}", rel.source_id, rel.relation_type, rel.target_id);
        }
        if orphaned.len() > args.show_orphans {
            println!("  ... and {} more", orphaned.len() - args.show_orphans);
        }
    }

    Ok(())
}
