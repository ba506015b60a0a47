//! Integration tests for the retrieval service happy paths
//!
//! These tests drive the public service API against scratch project trees:
//! - Indexing projects into the keyword and vector backends
//! - Tenant isolation between projects
//! - Idempotent re-indexing and removal of documents
//! - Keyword-only operation when the vector store is degraded
//! - Watcher events flowing into the index

use anyhow::Result;
use folio_context::FileCategory;
use folio_retriever::bootstrap::ConnectionMode;
use folio_retriever::retrieval::{BackendKind, ChangeKind, FileChangeWatcher};
use folio_retriever::{RetrievalDeps, RetrievalService, RetrieverConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use tokio::time::{Duration, Instant};

/// Lay out two projects sharing the word "lantern".
fn create_projects() -> Result<TempDir> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();

    write(
        root,
        "alpha/manuscript/ch1.md",
        "# Harbour\nThe lantern swings over the harbour.\n\n# Market\nWhat??? cried the fishmonger.\n",
    )?;
    write(
        root,
        "alpha/settings/town.md",
        "# Town\nA fishing town with one lantern per street.\n",
    )?;
    write(
        root,
        "beta/manuscript/ch1.md",
        "# Desert\nA lantern burns in the caravan tent.\n",
    )?;
    write(root, "beta/notes/todo.txt", "Check the caravan route.\n")?;
    Ok(temp_dir)
}

fn write(root: &Path, relative: &str, content: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

async fn start_service(root: &Path, vector_url: Option<&str>) -> Result<RetrievalService> {
    let mut config = RetrieverConfig::new(root).with_hashing_embeddings(128);
    if let Some(url) = vector_url {
        config = config.with_vector_url(url);
    }
    let deps = RetrievalDeps::from_config(&config)?;
    Ok(RetrievalService::start(config, deps).await?)
}

#[tokio::test]
async fn test_index_and_search_both_backends() -> Result<()> {
    let temp_dir = create_projects()?;
    let service = start_service(temp_dir.path(), Some("memory://it-both")).await?;
    assert_eq!(service.semantic_status().mode, ConnectionMode::Explicit);

    let summaries = service.index_project("alpha").await?;
    assert_eq!(summaries.len(), 2);
    for (backend, summary) in &summaries {
        assert_eq!(summary.files_indexed, 2, "{backend}");
        assert_eq!(summary.chunks_indexed, 3, "{backend}");
        assert_eq!(summary.files_failed, 0, "{backend}");
    }
    assert_eq!(summaries[0].0, BackendKind::Keyword);
    assert_eq!(summaries[1].0, BackendKind::Vector);

    let keyword = service.keyword_search("alpha", "lantern", 10, None).await?;
    assert_eq!(keyword.len(), 2);
    assert!(keyword.iter().all(|r| r.score > 0.0 && r.score <= 1.0));

    let semantic = service
        .semantic_search("alpha", "lantern harbour", 10, None)
        .await?;
    assert!(!semantic.is_empty());
    assert_eq!(semantic[0].payload.path, "manuscript/ch1.md");
    assert_eq!(semantic[0].payload.title, "Harbour");

    let settings = service
        .keyword_search("alpha", "lantern", 10, Some(FileCategory::Settings))
        .await?;
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0].payload.path, "settings/town.md");

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_tenant_isolation() -> Result<()> {
    let temp_dir = create_projects()?;
    let service = start_service(temp_dir.path(), Some("memory://it-tenants")).await?;
    service.index_project("alpha").await?;
    service.index_project("beta").await?;

    let beta_keyword = service.keyword_search("beta", "lantern", 10, None).await?;
    assert_eq!(beta_keyword.len(), 1);
    assert_eq!(beta_keyword[0].payload.title, "Desert");

    let beta_semantic = service.semantic_search("beta", "lantern", 10, None).await?;
    assert!(!beta_semantic.is_empty());
    assert!(
        beta_semantic
            .iter()
            .all(|r| r.payload.path == "manuscript/ch1.md" || r.payload.path == "notes/todo.txt")
    );
    assert!(beta_semantic.iter().all(|r| r.payload.title != "Harbour"));

    let alpha_caravan = service.keyword_search("alpha", "caravan", 10, None).await?;
    assert!(alpha_caravan.is_empty());

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_identical_documents_across_projects() -> Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    let text = "# Lighthouse\nThe keeper trims the lantern wick.\n";
    write(root, "alpha/manuscript/a.md", text)?;
    write(root, "beta/manuscript/a.md", text)?;

    let service = start_service(root, Some("memory://it-identical")).await?;
    service.index_project("alpha").await?;
    service.index_project("beta").await?;

    for project in ["alpha", "beta"] {
        assert_eq!(service.keyword_search(project, "lantern", 10, None).await?.len(), 1);
        assert_eq!(
            service.semantic_search(project, "keeper lantern", 10, None).await?.len(),
            1
        );
    }

    service.purge_project("beta").await?;
    assert!(service.keyword_search("beta", "lantern", 10, None).await?.is_empty());
    assert!(service.semantic_search("beta", "keeper lantern", 10, None).await?.is_empty());

    let keyword = service.keyword_search("alpha", "lantern", 10, None).await?;
    assert_eq!(keyword.len(), 1);
    assert_eq!(keyword[0].payload.path, "manuscript/a.md");
    let semantic = service.semantic_search("alpha", "keeper lantern", 10, None).await?;
    assert_eq!(semantic.len(), 1);
    assert_eq!(semantic[0].payload.title, "Lighthouse");

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reindex_is_idempotent() -> Result<()> {
    let temp_dir = create_projects()?;
    let root = temp_dir.path();
    let service = start_service(root, Some("memory://it-reindex")).await?;
    service.index_project("alpha").await?;

    let chapter = Path::new("manuscript/ch1.md");
    service.process_file("alpha", chapter).await?;
    service.process_file("alpha", chapter).await?;
    let hits = service.keyword_search("alpha", "harbour", 10, None).await?;
    assert_eq!(hits.len(), 1);
    let semantic = service.semantic_search("alpha", "harbour", 10, None).await?;
    let harbour_hits = semantic
        .iter()
        .filter(|r| r.payload.title == "Harbour")
        .count();
    assert_eq!(harbour_hits, 1);

    write(root, "alpha/manuscript/ch1.md", "# Quay\nThe quay is empty now.\n")?;
    service.process_file("alpha", chapter).await?;
    assert!(service.keyword_search("alpha", "harbour", 10, None).await?.is_empty());
    assert_eq!(service.keyword_search("alpha", "quay", 10, None).await?.len(), 1);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_degraded_vector_store_keeps_keyword_search() -> Result<()> {
    let temp_dir = create_projects()?;
    let service = start_service(temp_dir.path(), None).await?;

    let status = service.semantic_status();
    assert!(!status.success);
    assert_eq!(status.mode, ConnectionMode::Degraded);

    let summaries = service.index_project("beta").await?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(service.keyword_search("beta", "caravan", 10, None).await?.len(), 2);

    let err = service
        .semantic_search("beta", "caravan", 10, None)
        .await
        .unwrap_err();
    assert!(err.is_semantic_unavailable());
    assert!(err.to_string().contains("keyword search"));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_punctuation_query_falls_back_to_literal_match() -> Result<()> {
    let temp_dir = create_projects()?;
    let service = start_service(temp_dir.path(), None).await?;
    service.index_project("alpha").await?;

    let hits = service.keyword_search("alpha", "???", 10, None).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].payload.title, "Market");
    assert!(hits[0].snippet.contains("What???"));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_remove_and_purge() -> Result<()> {
    let temp_dir = create_projects()?;
    let service = start_service(temp_dir.path(), Some("memory://it-purge")).await?;
    service.index_project("alpha").await?;
    service.index_project("beta").await?;

    // Unknown documents are a no-op.
    service
        .remove_file("alpha", Path::new("manuscript/never.md"))
        .await?;
    assert_eq!(service.keyword_search("alpha", "lantern", 10, None).await?.len(), 2);

    service
        .remove_file("alpha", Path::new("settings/town.md"))
        .await?;
    assert_eq!(service.keyword_search("alpha", "lantern", 10, None).await?.len(), 1);

    service.purge_project("alpha").await?;
    assert!(service.keyword_search("alpha", "lantern", 10, None).await?.is_empty());
    assert!(service.semantic_search("alpha", "lantern", 10, None).await?.is_empty());
    assert_eq!(service.keyword_search("beta", "lantern", 10, None).await?.len(), 1);
    assert!(!service.semantic_search("beta", "lantern", 10, None).await?.is_empty());

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_project_ids_are_rejected() -> Result<()> {
    let temp_dir = create_projects()?;
    let service = start_service(temp_dir.path(), None).await?;

    for project in ["", ".hidden", "../alpha", "alpha/manuscript"] {
        assert!(
            service.keyword_search(project, "lantern", 10, None).await.is_err(),
            "{project:?} should be rejected"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_watcher_events_reach_the_index() -> Result<()> {
    let temp_dir = create_projects()?;
    let root = temp_dir.path();
    let service = Arc::new(start_service(root, None).await?);
    service.index_project("beta").await?;

    let (watcher, rx) =
        FileChangeWatcher::new(root, vec!["md".to_string()], Duration::from_millis(50));
    watcher.start()?;
    let consumer = tokio::spawn(service.clone().run_change_consumer(rx));

    write(root, "beta/manuscript/ch2.md", "# Oasis\nPalms around the oasis.\n")?;
    watcher.push_raw(ChangeKind::Add, "beta/manuscript/ch2.md");

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if !service.keyword_search("beta", "oasis", 10, None).await?.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "change never reached the index");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    std::fs::remove_file(root.join("beta/manuscript/ch2.md"))?;
    watcher.push_raw(ChangeKind::Unlink, "beta/manuscript/ch2.md");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if service.keyword_search("beta", "oasis", 10, None).await?.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "unlink never reached the index");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    watcher.stop();
    drop(watcher);
    tokio::time::timeout(Duration::from_secs(5), consumer).await??;
    service.shutdown().await;
    Ok(())
}
