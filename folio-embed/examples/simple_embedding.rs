//! Embeds a few sentences and prints their pairwise similarity.
//!
//! Uses FastEmbed when run with `--model`, otherwise the offline hashing provider.

use folio_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider, HashingProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let provider: Box<dyn EmbeddingProvider> = match std::env::args().nth(1).as_deref() {
        Some("--model") => {
            let temp_dir = tempfile::tempdir()?;
            let config = EmbedConfig::default_with_path(temp_dir.path())
                .with_batch_size(2)
                .with_download_progress(true);
            Box::new(FastEmbedProvider::create(config).await?)
        }
        _ => Box::new(HashingProvider::default()),
    };

    println!("Provider: {}", provider.provider_name());
    println!("Dimension: {}", provider.embedding_dimension());

    let texts = vec![
        "The lighthouse keeper climbed the spiral stairs.".to_string(),
        "A keeper walked up the lighthouse tower.".to_string(),
        "Interest rates rose in the third quarter.".to_string(),
    ];
    let result = provider.embed_texts(&texts).await?;

    for (i, a) in result.embeddings.iter().enumerate() {
        for (j, b) in result.embeddings.iter().enumerate().skip(i + 1) {
            let similarity: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            println!("{} <-> {}: {similarity:.3}", i + 1, j + 1);
        }
    }

    provider.dispose().await?;
    Ok(())
}
