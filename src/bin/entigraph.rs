//! Entigraph command-line interface.
//!
//! Runs the resolution pipeline against a persistent index directory:
//! `ingest` mention batches, `crossref` candidate names, `build` a graph
//! snapshot from co-occurrences, and `verify` a snapshot before publishing.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use entigraph::crossref::Candidate;
use entigraph::entity::parse_mentions;
use entigraph::graph::{parse_cooccurrences, GraphBuilder, GraphSnapshot};
use entigraph::pipeline::IngestPipeline;
use entigraph::storage::IndexStore;
use entigraph::verifier::GraphVerifier;
use entigraph::EntigraphConfig;

#[derive(Debug, Parser)]
#[command(name = "entigraph", version, about = "Entity resolution and relationship-graph integrity")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "ENTIGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Canonicalize a mention batch and commit it to the index.
    Ingest {
        /// Index directory.
        #[arg(long)]
        index_dir: PathBuf,
        /// JSON array of mention records.
        mentions: PathBuf,
    },
    /// Classify candidate names as matched or new without writing.
    Crossref {
        #[arg(long)]
        index_dir: PathBuf,
        /// JSON array of `{name, entity_type?}` candidates.
        candidates: PathBuf,
    },
    /// Build a graph snapshot from co-occurrence records.
    Build {
        #[arg(long)]
        index_dir: PathBuf,
        /// JSON array of co-occurrence records.
        cooccurrences: PathBuf,
        /// Where to write the full snapshot (input of `verify`).
        #[arg(long)]
        snapshot: PathBuf,
        /// Where to write the published `{nodes, edges}` graph.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Overrides `graph.min_edge_weight`.
        #[arg(long)]
        min_edge_weight: Option<u64>,
    },
    /// Run the six integrity checks over a snapshot.
    Verify {
        snapshot: PathBuf,
        /// Where to write the report; stdout if omitted.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "entigraph failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => EntigraphConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EntigraphConfig::default(),
    };

    match cli.command {
        Command::Ingest {
            index_dir,
            mentions,
        } => {
            let pipeline = open_pipeline(&index_dir, &config)?;
            let (mentions, parse_rejected) = parse_mentions(read_array(&mentions)?);
            let summary = pipeline.ingest_batch(&mentions)?;
            // Positions in `parse_rejected` index the input file; positions
            // in `summary.rejected` index the parsed batch.
            print_json(&serde_json::json!({
                "summary": summary,
                "parse_rejected": parse_rejected,
            }))?;
        }
        Command::Crossref {
            index_dir,
            candidates,
        } => {
            let pipeline = open_pipeline(&index_dir, &config)?;
            let candidates: Vec<Candidate> = serde_json::from_value(serde_json::Value::Array(
                read_array(&candidates)?,
            ))
            .context("parsing candidates")?;
            let result = pipeline
                .cross_referencer()
                .cross_reference(pipeline.index(), &candidates)?;
            print_json(&result)?;
        }
        Command::Build {
            index_dir,
            cooccurrences,
            snapshot,
            output,
            min_edge_weight,
        } => {
            let pipeline = open_pipeline(&index_dir, &config)?;
            let (records, rejected) = parse_cooccurrences(read_array(&cooccurrences)?);
            if !rejected.is_empty() {
                tracing::warn!(rejected = rejected.len(), "skipped malformed co-occurrence records");
            }

            let mut builder = GraphBuilder::new(Arc::clone(pipeline.index()));
            let report = builder.apply_batch(&records)?;
            let mut graph_config = config.graph.clone();
            if min_edge_weight.is_some() {
                graph_config.min_edge_weight = min_edge_weight;
            }
            let graph = builder.snapshot(&graph_config)?;

            write_json(&snapshot, &graph)?;
            if let Some(output) = output {
                write_json(&output, &graph.to_output())?;
            }
            print_json(&report)?;
        }
        Command::Verify { snapshot, report } => {
            let raw = fs::read_to_string(&snapshot)
                .with_context(|| format!("reading {}", snapshot.display()))?;
            let graph: GraphSnapshot = serde_json::from_str(&raw).context("parsing snapshot")?;

            let mut verifier = GraphVerifier::new(config.verifier.clone())?;
            let result = verifier.run(&graph)?;
            match report {
                Some(path) => write_json(&path, &result)?,
                None => print_json(&result)?,
            }
            if let Some(err) = result.integrity_error() {
                tracing::error!(error = %err, "snapshot failed fatal integrity checks");
            }
            return Ok(if result.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn open_pipeline(dir: &Path, config: &EntigraphConfig) -> Result<IngestPipeline> {
    let store = IndexStore::open(dir).with_context(|| format!("opening index {}", dir.display()))?;
    Ok(IngestPipeline::open(Arc::new(store), config)?)
}

fn read_array(path: &Path) -> Result<Vec<serde_json::Value>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    match value {
        serde_json::Value::Array(records) => Ok(records),
        _ => bail!("{} must contain a JSON array", path.display()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))
}
