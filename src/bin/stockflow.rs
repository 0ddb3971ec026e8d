//! stockflow CLI: import, embed and consolidate a systems-thinking graph.
//!
//! Usage:
//!   stockflow import <extraction.json> [--db path]
//!   stockflow embed [--local]
//!   stockflow consolidate | resume <run-id> | runs | reset | clean --yes
//!   stockflow similarity <a> <b> | relationships <id> | status | synthesize-preview <a> <b>

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stockflow::config::{api_key_from_env, API_KEY_ENV};
use stockflow::diagnostics::Diagnostics;
use stockflow::embedding::{EmbeddingJob, EmbeddingProvider};
use stockflow::gemini::GeminiClient;
use stockflow::import::import_file;
use stockflow::{
    ConsolidationOrchestrator, GraphStore, NameSynthesizer, NodeId, OpenStore, RunId, RunOutcome,
    RunReport, SqliteStore, StockflowConfig,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stockflow",
    version,
    about = "Consolidation engine for systems-thinking knowledge graphs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter, e.g. `debug` or `stockflow=trace` (defaults to RUST_LOG, then `stockflow=info`)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an extraction document (narratives, nodes, relationships)
    Import {
        /// Path to the JSON document
        path: PathBuf,
    },
    /// Embed every concept node that has no embedding yet
    Embed {
        /// Use the local fastembed model instead of Gemini (needs the `embeddings` feature)
        #[arg(long)]
        local: bool,
    },
    /// Run a consolidation pass
    Consolidate,
    /// Resume an aborted consolidation run
    Resume {
        /// Run id as printed by `consolidate` or `runs`
        run_id: String,
    },
    /// List consolidation runs, most recent first
    Runs,
    /// Return every node and relationship to the unconsolidated state
    Reset,
    /// Delete all concept nodes and relationships, keeping narratives
    Clean {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Cosine similarity between two concept nodes
    Similarity { a: String, b: String },
    /// Relationships touching a node
    Relationships { id: String },
    /// Consolidation status per relationship type
    Status,
    /// Show what synthesis would name a merge of `absorbed` into `canonical`
    SynthesizePreview { canonical: String, absorbed: String },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stockflow=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<StockflowConfig, String> {
    match path {
        Some(path) => StockflowConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(StockflowConfig::default()),
    }
}

fn open_store(config: &StockflowConfig, db: Option<PathBuf>) -> Result<Arc<SqliteStore>, String> {
    let db_path = db.unwrap_or_else(|| config.storage.resolved_db_path());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    SqliteStore::open(&db_path)
        .map(Arc::new)
        .map_err(|e| format!("Failed to open database {}: {}", db_path.display(), e))
}

/// Gemini-backed synthesizer, or a disabled one when synthesis is off or no key is set
fn build_synthesizer(config: &StockflowConfig, store: Arc<dyn GraphStore>) -> NameSynthesizer {
    if !config.synthesis.enabled {
        return NameSynthesizer::disabled(store);
    }
    match api_key_from_env() {
        Some(key) => NameSynthesizer::new(
            store,
            Arc::new(GeminiClient::for_synthesis(key, &config.synthesis)),
            config.synthesis.timeout(),
        ),
        None => {
            warn!("{} not set, merges keep canonical names", API_KEY_ENV);
            NameSynthesizer::disabled(store)
        }
    }
}

fn build_embedder(config: &StockflowConfig, local: bool) -> Result<Arc<dyn EmbeddingProvider>, String> {
    if local {
        #[cfg(feature = "embeddings")]
        {
            return stockflow::embedding::FastEmbedProvider::default_model()
                .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>)
                .map_err(|e| e.to_string());
        }
        #[cfg(not(feature = "embeddings"))]
        {
            return Err("--local requires building with the `embeddings` feature".to_string());
        }
    }
    let key = api_key_from_env().ok_or_else(|| format!("{} is not set", API_KEY_ENV))?;
    Ok(Arc::new(GeminiClient::for_embedding(key, &config.embedding)))
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_report(report: &RunReport) -> i32 {
    let c = &report.counts;
    println!("Run {}", report.run_id);
    println!(
        "  matches: {}  merges: {}  promotions: {}  already canonical: {}",
        c.matches, c.merges, c.promotions, c.already_canonical
    );
    println!(
        "  synthesized: {}  synthesis failures: {}",
        c.synthesized, c.synthesis_failures
    );
    println!(
        "  relationships flagged: {}  rewired: {}  evidence appended: {}",
        c.relationships_flagged, c.relationships_rewired, c.evidence_appended
    );
    println!("  nodes swept: {}", c.nodes_swept);
    for skipped in &report.skipped {
        println!("  skipped [{}] {}: {}", skipped.phase, skipped.item, skipped.reason);
    }
    match &report.outcome {
        RunOutcome::Completed => {
            println!("Completed");
            0
        }
        RunOutcome::Aborted { phase, error } => {
            eprintln!("Aborted in {}: {}", phase, error);
            eprintln!("Resume with: stockflow resume {}", report.run_id);
            1
        }
    }
}

fn cmd_import(store: &SqliteStore, path: &PathBuf) -> i32 {
    match import_file(store, path) {
        Ok(report) => {
            println!(
                "Imported {} narratives, {} nodes, {} relationships ({} duplicates, {} evidence appended, {} skipped)",
                report.narratives,
                report.nodes,
                report.relationships_inserted,
                report.relationships_duplicate,
                report.evidence_appended,
                report.skipped.len()
            );
            for (item, reason) in &report.skipped {
                println!("  skipped {}: {}", item, reason);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_embed(config: &StockflowConfig, store: Arc<SqliteStore>, local: bool) -> i32 {
    let provider = match build_embedder(config, local) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let job = EmbeddingJob::new(
        store,
        provider,
        config.embedding.batch_size,
        config.embedding.timeout(),
    );
    match job.run().await {
        Ok(report) => {
            println!("Embedded {} nodes ({} skipped)", report.embedded, report.skipped);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn orchestrator(config: &StockflowConfig, store: Arc<SqliteStore>) -> Result<ConsolidationOrchestrator, String> {
    let synthesizer = build_synthesizer(config, store.clone());
    ConsolidationOrchestrator::new(store, &config.consolidation, synthesizer).map_err(|e| e.to_string())
}

async fn cmd_consolidate(config: &StockflowConfig, store: Arc<SqliteStore>, resume: Option<String>) -> i32 {
    let orchestrator = match orchestrator(config, store) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let result = match resume {
        Some(id) => orchestrator.resume(&RunId::from_string(id)).await,
        None => orchestrator.run().await,
    };
    match result {
        Ok(report) => print_report(&report),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_runs(store: &SqliteStore) -> i32 {
    let runs = match store.list_runs() {
        Ok(runs) => runs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if runs.is_empty() {
        println!("No consolidation runs.");
        return 0;
    }
    println!("{:<36}  {:<20}  {:<10}  {:>6}  {:>7}", "ID", "STARTED", "STATUS", "PHASES", "MERGES");
    println!("{}", "-".repeat(88));
    for run in runs {
        let status = match &run.status {
            stockflow::consolidation::RunStatus::Running => "running".to_string(),
            stockflow::consolidation::RunStatus::Completed => "completed".to_string(),
            stockflow::consolidation::RunStatus::Aborted { phase, .. } => format!("aborted@{}", phase),
        };
        println!(
            "{:<36}  {:<20}  {:<10}  {:>6}  {:>7}",
            run.id.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            status,
            run.completed_phases.len(),
            run.counts.merges
        );
    }
    0
}

fn cmd_reset(config: &StockflowConfig, store: Arc<SqliteStore>) -> i32 {
    let orchestrator = match orchestrator(config, store) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match orchestrator.reset() {
        Ok(counts) => {
            println!(
                "Reset {} nodes and {} relationships to unconsolidated",
                counts.nodes, counts.relationships
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_clean(store: &SqliteStore, yes: bool) -> i32 {
    if !yes {
        eprintln!("Error: clean deletes every concept node and relationship; pass --yes to confirm");
        return 1;
    }
    match store.clean_non_narrative_data() {
        Ok(counts) => {
            println!(
                "Deleted {} nodes and {} relationships; {} narratives preserved",
                counts.nodes_deleted, counts.relationships_deleted, counts.narratives_preserved
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn run_diagnostic(config: &StockflowConfig, store: Arc<SqliteStore>, command: Commands) -> i32 {
    let diagnostics = Diagnostics::new(store.clone(), config.consolidation.similarity_threshold);
    match command {
        Commands::Similarity { a, b } => match diagnostics.similarity_between(&NodeId::from(a), &NodeId::from(b)) {
            Ok(report) => print_json(&report),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Commands::Relationships { id } => match diagnostics.node_relationships(&NodeId::from(id)) {
            Ok(rels) => print_json(&rels),
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Commands::Status => match diagnostics.relationship_status() {
            Ok(status) => {
                println!("{:<18}  {:>12}  {:>14}  {:>9}", "TYPE", "CONSOLIDATED", "UNCONSOLIDATED", "MAX SCORE");
                println!("{}", "-".repeat(60));
                for row in status {
                    println!(
                        "{:<18}  {:>12}  {:>14}  {:>9}",
                        row.rel_type.as_str(), row.consolidated, row.unconsolidated, row.max_score
                    );
                }
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Commands::SynthesizePreview { canonical, absorbed } => {
            let synthesizer = build_synthesizer(config, store);
            match diagnostics
                .preview_synthesis(&synthesizer, &NodeId::from(canonical), &NodeId::from(absorbed))
                .await
            {
                Ok(preview) => print_json(&preview),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    1
                }
            }
        }
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let store = match open_store(&config, cli.db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Import { path } => cmd_import(&store, &path),
        Commands::Embed { local } => cmd_embed(&config, store, local).await,
        Commands::Consolidate => cmd_consolidate(&config, store, None).await,
        Commands::Resume { run_id } => cmd_consolidate(&config, store, Some(run_id)).await,
        Commands::Runs => cmd_runs(&store),
        Commands::Reset => cmd_reset(&config, store),
        Commands::Clean { yes } => cmd_clean(&store, yes),
        command => run_diagnostic(&config, store, command).await,
    };
    std::process::exit(code);
}
