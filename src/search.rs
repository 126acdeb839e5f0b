//! `ragline search`: index one file and print ranked passages.
//!
//! The collection lives only for the duration of the command, so every run
//! starts from an empty index. Results are deduplicated when
//! `[retrieval].dedupe` is on, exactly as `POST /api/query` does.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ragline_core::{dedupe, CollectionManager, RetrievalResult, SessionKey};

use crate::config::Config;
use crate::ingest::ingest_file;
use crate::providers::Providers;

/// Longest excerpt printed per result, in characters.
const EXCERPT_CHARS: usize = 240;

pub async fn run_search(
    config: &Config,
    key: SessionKey,
    file: &Path,
    query: &str,
    limit: Option<i64>,
    score_threshold: Option<f32>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let manager = CollectionManager::new(Arc::new(Providers::new(config)?));
    let collection = manager.acquire(&key);
    let report = ingest_file(config, &collection, file).await?;
    println!(
        "Indexed {} ({} pages, {} chunks)",
        report.file_name, report.pages, report.chunks
    );
    println!();

    let limit = limit.unwrap_or(config.retrieval.query_limit);
    let threshold = score_threshold.unwrap_or(config.retrieval.query_score_threshold);
    let mut results = collection.pipeline().search(query, limit, threshold).await?;
    if config.retrieval.dedupe {
        results = dedupe(results);
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &RetrievalResult) {
    let file = result.metadata.file_name.as_deref().unwrap_or("N/A");
    let page = result.metadata.page_label.as_deref().unwrap_or("N/A");
    println!("{}. [{:.3}] {} / page {}", rank, result.score, file, page);
    println!("    excerpt: \"{}\"", excerpt(&result.text));
    println!();
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}
