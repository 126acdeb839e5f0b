//! `ragline ask`: index one file and stream an answer to stdout.
//!
//! Runs the same retrieval and composition as `POST /api/chat`, printing
//! fragments as they arrive instead of framing them as server-sent events.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use ragline_core::{dedupe, CollectionManager, ComposedContext, ContextComposer, SessionKey};
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::ingest::ingest_file;
use crate::providers::{GeneratorFactory, Providers};

const TRACING_TARGET: &str = "ragline::ask";

pub async fn run_ask(
    config: &Config,
    key: SessionKey,
    file: &Path,
    question: &str,
    model: Option<&str>,
) -> Result<()> {
    if question.trim().is_empty() {
        anyhow::bail!("question must not be empty");
    }

    let providers = Arc::new(Providers::new(config)?);
    let manager = CollectionManager::new(providers.clone());
    let collection = manager.acquire(&key);
    ingest_file(config, &collection, file).await?;

    let retrieval = &config.retrieval;
    let composer = ContextComposer::new(config.generation.system_prompt.as_str())
        .with_fallback(config.generation.fallback_message.as_str());
    let context = match collection
        .pipeline()
        .search(question, retrieval.chat_limit, retrieval.chat_score_threshold)
        .await
    {
        Ok(mut results) => {
            if retrieval.dedupe {
                results = dedupe(results);
            }
            composer.compose(&results)
        }
        Err(err) => {
            tracing::warn!(target: TRACING_TARGET, error = %err, "retrieval failed, answering without documents");
            ComposedContext::RetrievalFailed
        }
    };

    let generator = providers.generator_for(&key, model);
    let mut answer = composer.answer(generator, &context, question);
    let mut stdout = tokio::io::stdout();
    while let Some(fragment) = answer.next().await {
        stdout.write_all(fragment.as_bytes()).await?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
