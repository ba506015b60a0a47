use clap::{Parser, Subcommand};
use folio_context::FileCategory;
use folio_retriever::{
    RetrievalDeps, RetrievalService, RetrieverConfig, retrieval::FileChangeWatcher,
    retrieval::RetrievalResult,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Index and search tenant document projects.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per project (overrides the config)
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index every document of a project
    Index {
        /// Project id
        project: String,
    },
    /// Search a project
    Search {
        /// Project id
        project: String,
        /// Query text
        query: String,
        /// Use the vector store instead of keyword search
        #[arg(long)]
        semantic: bool,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Restrict to content or settings documents
        #[arg(long)]
        category: Option<FileCategory>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Watch the projects root and keep every touched project indexed
    Watch,
    /// Run the vector store bootstrap and report the outcome
    Bootstrap,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<RetrieverConfig> {
    let mut config = match &args.config {
        Some(path) => RetrieverConfig::from_toml_file(path)?,
        None => RetrieverConfig::default(),
    };
    if let Some(root) = &args.root {
        config.projects_root = root.clone();
    }
    Ok(config)
}

fn print_results(results: &[RetrievalResult], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
        }
        OutputFormat::Summary => {
            println!("Found {} results:", results.len());
            for result in results {
                println!(
                    "  {:.3} | {}:{}-{} | {}",
                    result.score,
                    result.payload.path,
                    result.payload.start_line,
                    result.payload.end_line,
                    result.payload.title
                );
                if !result.snippet.is_empty() {
                    println!("        {}", result.snippet.replace('\n', " "));
                }
            }
        }
    }
    Ok(())
}

async fn execute(
    command: Commands,
    service: &Arc<RetrievalService>,
    config: &RetrieverConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Index { project } => {
            for (backend, summary) in service.index_project(&project).await? {
                println!(
                    "{backend}: {} files, {} chunks, {} failures",
                    summary.files_indexed, summary.chunks_indexed, summary.files_failed
                );
            }
        }
        Commands::Search {
            project,
            query,
            semantic,
            limit,
            category,
            format,
        } => {
            let results = if semantic {
                service
                    .semantic_search(&project, &query, limit, category)
                    .await?
            } else {
                // The keyword index lives in memory, so build it first.
                service.index_project(&project).await?;
                service
                    .keyword_search(&project, &query, limit, category)
                    .await?
            };
            print_results(&results, &format)?;
        }
        Commands::Watch => {
            let (watcher, rx) = FileChangeWatcher::from_config(config);
            watcher.start()?;
            println!("Watching {}", watcher.root().display());
            let consumer = tokio::spawn(service.clone().run_change_consumer(rx));

            tokio::signal::ctrl_c().await?;
            watcher.stop();
            // Dropping the watcher closes the channel and ends the consumer.
            drop(watcher);
            consumer.await?;
        }
        Commands::Bootstrap => {
            println!(
                "{}",
                serde_json::to_string_pretty(service.semantic_status())?
            );
        }
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let deps = RetrievalDeps::from_config(&config)?;
    let service = Arc::new(RetrievalService::start(config.clone(), deps).await?);

    let outcome = execute(args.command, &service, &config).await;
    service.shutdown().await;
    outcome
}
