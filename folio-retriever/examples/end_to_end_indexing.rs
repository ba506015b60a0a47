//! End-to-end example demonstrating the complete retrieval workflow
//!
//! This example shows how to:
//! 1. Lay out a project with manuscript and settings documents
//! 2. Start a RetrievalService backed by the in-process vector store
//! 3. Index the project into the keyword and vector backends
//! 4. Run keyword and semantic queries against it
//!
//! The hashing embedding provider keeps the example offline. Switch to
//! `provider = "fastembed"` for real semantic embeddings.

use anyhow::Result;
use folio_context::FileCategory;
use folio_retriever::retrieval::RetrievalResult;
use folio_retriever::{RetrievalDeps, RetrievalService, RetrieverConfig};
use std::path::Path;
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let temp_dir = tempdir()?;
    create_project(temp_dir.path())?;
    println!("Created project at {}", temp_dir.path().join("lighthouse").display());

    let config = RetrieverConfig::new(temp_dir.path())
        .with_vector_url("memory://example")
        .with_hashing_embeddings(256);
    let deps = RetrievalDeps::from_config(&config)?;
    let service = RetrievalService::start(config, deps).await?;
    println!("Vector store mode: {}", service.semantic_status().mode);

    for (backend, summary) in service.index_project("lighthouse").await? {
        println!(
            "{backend}: indexed {} files into {} chunks",
            summary.files_indexed, summary.chunks_indexed
        );
    }

    let queries = [
        ("keeper", false, None),
        ("storm at sea", true, None),
        ("island", false, Some(FileCategory::Settings)),
    ];
    for (query, semantic, category) in queries {
        let results = if semantic {
            service.semantic_search("lighthouse", query, 3, category).await?
        } else {
            service.keyword_search("lighthouse", query, 3, category).await?
        };
        let mode = if semantic { "semantic" } else { "keyword" };
        println!("\n{mode} search for '{query}':");
        print_results(&results);
    }

    service.shutdown().await;
    Ok(())
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("  (no results)");
    }
    for result in results {
        println!(
            "  {:.3} {} [{}] lines {}-{}",
            result.score,
            result.payload.path,
            result.payload.title,
            result.payload.start_line,
            result.payload.end_line
        );
    }
}

fn create_project(root: &Path) -> Result<()> {
    let project = root.join("lighthouse");
    std::fs::create_dir_all(project.join("manuscript"))?;
    std::fs::create_dir_all(project.join("settings"))?;

    std::fs::write(
        project.join("manuscript/ch1.md"),
        r#"---
tags: [opening, night]
---
# The Keeper
Every evening the keeper climbs one hundred steps to light the lamp.

# The Storm
Waves break over the rocks and the storm at sea rattles the windows.
"#,
    )?;
    std::fs::write(
        project.join("settings/island.md"),
        r#"# The Island
A granite island two miles off the coast, home to the lighthouse and nothing else.
"#,
    )?;
    Ok(())
}
