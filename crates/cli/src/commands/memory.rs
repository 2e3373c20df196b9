//! `ferrule ingest`, `ferrule recall`, `ferrule memory`: retrieval memory.

use anyhow::Context;
use ferrule_agent::open_memory;
use ferrule_config::AppConfig;
use std::io::Read;
use std::path::Path;

pub async fn ingest(config: &AppConfig, path: &Path, source: Option<String>) -> anyhow::Result<()> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    let source = source.unwrap_or_else(|| path.display().to_string());

    let memory = open_memory(&config.memory)?;
    let chunks = memory.ingest(&source, &text).await?;
    println!("Ingested {chunks} chunks from {source}");
    Ok(())
}

pub async fn recall(config: &AppConfig, text: &str, top_k: usize) -> anyhow::Result<()> {
    let memory = open_memory(&config.memory)?;
    let result = memory.query(text, top_k).await?;
    if result.is_empty() {
        println!("No matching chunks.");
    } else {
        print!("{}", result.render());
    }
    Ok(())
}

pub async fn stats(config: &AppConfig) -> anyhow::Result<()> {
    let memory = open_memory(&config.memory)?;
    let stats = memory.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    if let Some(warning) = memory.load_warning() {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

pub async fn forget(config: &AppConfig, source: &str) -> anyhow::Result<()> {
    let memory = open_memory(&config.memory)?;
    let removed = memory.evict_source(source).await?;
    println!("Removed {removed} chunks from {source}");
    Ok(())
}
