//! Collection setup and seeding: `ichat init`, `ichat add`, `ichat info`.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::info;

use crate::config::Config;
use crate::connector_fs;
use crate::index::IndexHandle;
use crate::models::SourceItem;

pub async fn run_init(config: &Config) -> Result<()> {
    let index = IndexHandle::create(&config.index.dir, &config.index.collection).await?;
    println!(
        "Collection '{}' initialized at {}",
        index.collection(),
        index.path().display()
    );
    index.close().await;
    Ok(())
}

/// Add files, directories, and inline texts to the configured collection,
/// creating it if needed.
pub async fn run_add(config: &Config, paths: &[PathBuf], texts: &[String]) -> Result<()> {
    if paths.is_empty() && texts.is_empty() {
        bail!("Nothing to add: pass one or more paths or --text");
    }

    let mut items: Vec<SourceItem> = Vec::new();
    let globs: Vec<String> = connector_fs::DEFAULT_INCLUDE_GLOBS
        .iter()
        .map(|s| s.to_string())
        .collect();
    for path in paths {
        items.extend(connector_fs::scan_path(path, &globs)?);
    }
    for text in texts {
        if text.trim().is_empty() {
            bail!("--text must not be empty");
        }
        items.push(SourceItem::from_text(text));
    }

    let index = IndexHandle::create(&config.index.dir, &config.index.collection).await?;

    let mut docs_upserted = 0u64;
    let mut chunks_written = 0u64;
    for item in &items {
        let (_, chunks) = index.add_item(item, config.chunking.max_tokens).await?;
        docs_upserted += 1;
        chunks_written += chunks as u64;
    }
    info!(
        collection = %index.collection(),
        docs = docs_upserted,
        chunks = chunks_written,
        "add complete"
    );

    println!("add {}", index.collection());
    println!("  upserted documents: {}", docs_upserted);
    println!("  chunks written: {}", chunks_written);
    println!("ok");

    index.close().await;
    Ok(())
}

pub async fn run_info(config: &Config) -> Result<()> {
    let index = IndexHandle::load_from_disk(&config.index.dir, &config.index.collection).await?;
    println!("collection: {}", index.collection());
    println!("path: {}", index.path().display());
    println!("documents: {}", index.document_count().await?);
    println!("chunks: {}", index.chunk_count().await?);
    index.close().await;
    Ok(())
}
