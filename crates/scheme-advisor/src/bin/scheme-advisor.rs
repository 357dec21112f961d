//! Interactive terminal front end: one line in, one answer out.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use scheme_advisor::graph::GraphSnapshot;
use scheme_advisor::llm::{build_provider, UnavailableProvider};
use scheme_advisor::{
    AdvisorConfig, LLMConfig, LLMProvider, Orchestrator, PassageIndex, RuleBasedSummarizer, SchemeGraph,
    SessionMemory,
};

const EXIT_WORDS: &[&str] = &["exit", "quit", "done", "stop"];
const MAX_GRAPH_NODES: usize = 50_000;

#[derive(Parser)]
#[command(name = "scheme-advisor")]
#[command(about = "Ask questions about Indian government welfare schemes", long_about = None)]
struct Cli {
    /// JSON config file (defaults to the platform config dir)
    #[arg(short, long, env = "SCHEME_ADVISOR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of .txt/.md scheme documents to index
    #[arg(short, long)]
    docs: Option<PathBuf>,

    /// Knowledge graph snapshot (JSON)
    #[arg(short, long)]
    graph: Option<PathBuf>,

    /// Session file; loaded on start and saved after every turn
    #[arg(short, long)]
    session: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<AdvisorConfig> {
    if let Some(path) = path {
        return Ok(AdvisorConfig::from_file(path)?);
    }
    match AdvisorConfig::default_path() {
        Some(default) if default.exists() => Ok(AdvisorConfig::from_file(&default)?),
        _ => {
            let config = AdvisorConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn provider_or_unavailable(config: &LLMConfig) -> Arc<dyn LLMProvider> {
    match build_provider(config) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!(error = %e, model = %config.model, "LLM provider unavailable, components will use their fallbacks");
            Arc::new(UnavailableProvider::new(e.to_string()))
        }
    }
}

fn index_documents(index: &PassageIndex, dir: &Path) -> Result<usize> {
    let mut indexed = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "txt" | "md"));
        if !is_text {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        let title = path.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
        index.add_document(title, &text)?;
        indexed += 1;
    }
    Ok(indexed)
}

fn load_graph(path: &Path) -> Result<SchemeGraph> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let snapshot: GraphSnapshot = serde_json::from_str(&content).context("invalid graph snapshot")?;
    Ok(SchemeGraph::from_snapshot(snapshot, MAX_GRAPH_NODES))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let index = Arc::new(PassageIndex::in_memory(&config.retrieval)?);
    if let Some(dir) = &cli.docs {
        let count = index_documents(&index, dir)?;
        tracing::info!(documents = count, chunks = index.count(), "Scheme documents indexed");
    }

    let graph = match &cli.graph {
        Some(path) => load_graph(path)?,
        None => SchemeGraph::new(MAX_GRAPH_NODES),
    };
    tracing::info!(entities = graph.node_count(), relations = graph.edge_count(), "Knowledge graph ready");

    let orchestrator = Orchestrator::from_config(
        &config,
        provider_or_unavailable(&config.llm.primary),
        provider_or_unavailable(&config.llm.secondary),
        index.clone(),
        Arc::new(graph),
    );

    let mut memory = match &cli.session {
        Some(path) if path.exists() => SessionMemory::load(path)?,
        _ => SessionMemory::new(),
    };
    let summarizer = RuleBasedSummarizer::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Enter query: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
            break;
        }

        let state = memory.begin_turn(input, &config.session);
        let answer = orchestrator.respond(state).await;
        println!("\nUSER_QUERY: {}\n", input);
        println!("ANSWER: {}\n", answer);

        memory.record_exchange(input, &answer);
        if memory.needs_archive(&config.session) {
            if let Err(e) = memory
                .archive_and_truncate(&config.session, &summarizer, index.as_ref())
                .await
            {
                tracing::warn!(error = %e, "Session archive failed, keeping full history");
            }
        }
        if let Some(path) = &cli.session {
            if let Err(e) = memory.save(path) {
                tracing::warn!(error = %e, "Failed to save session");
            }
        }
    }

    Ok(())
}
