//! Context composition and streamed generation relay.
//!
//! [`ContextComposer::compose`] turns ranked passages into the context block
//! placed in the system prompt. [`ContextComposer::answer`] hands that prompt
//! to a [`GenerationPort`] and relays the provider's fragments as an
//! [`AnswerStream`].
//!
//! # Stream contract
//!
//! The answer stream is lazy (nothing is sent to the provider until it is
//! first polled), finite, and cannot be restarted. It never yields an error:
//! if the provider call fails to start, or breaks mid-stream, the stream
//! yields the composer's fallback message once and ends. Dropping the stream
//! drops the in-flight provider future and its connection, which is how a
//! client disconnect cancels generation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::GenerationError;
use crate::models::RetrievalResult;

/// Sentinel context used when retrieval found nothing.
pub const NO_RELEVANT_DOCUMENTS: &str = "No relevant documents found for the query.";

/// Context used when retrieval itself failed.
pub const RETRIEVAL_FAILED: &str = "Error retrieving documents for context.";

/// Default user-facing message emitted when generation fails.
pub const DEFAULT_FALLBACK: &str =
    "Sorry, I encountered an error processing your request with the AI model.";

const CONTEXT_HEADER: &str = "Relevant context from uploaded documents:";
const NOT_AVAILABLE: &str = "N/A";

/// Raw fragments from a generation provider.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// Fragments relayed to the caller; failures are already folded into text.
pub type AnswerStream = BoxStream<'static, String>;

/// The external completion service.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Start a completion and return its fragments as they arrive.
    async fn generate(
        &self,
        system_context: &str,
        user_message: &str,
    ) -> Result<FragmentStream, GenerationError>;
}

/// The context block handed to the generation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposedContext {
    /// Attributed passages, in rank order.
    Passages(String),
    /// Retrieval succeeded but returned nothing.
    NoRelevantDocuments,
    /// Retrieval failed; generation proceeds without documents.
    RetrievalFailed,
}

impl ComposedContext {
    pub fn as_str(&self) -> &str {
        match self {
            ComposedContext::Passages(block) => block,
            ComposedContext::NoRelevantDocuments => NO_RELEVANT_DOCUMENTS,
            ComposedContext::RetrievalFailed => RETRIEVAL_FAILED,
        }
    }

    pub fn has_passages(&self) -> bool {
        matches!(self, ComposedContext::Passages(_))
    }
}

impl fmt::Display for ComposedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds prompts from retrieved passages and relays generated answers.
#[derive(Debug, Clone)]
pub struct ContextComposer {
    system_prompt: String,
    fallback: String,
}

impl ContextComposer {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            fallback: DEFAULT_FALLBACK.to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Attribute and concatenate passages in the order given.
    ///
    /// Each passage gets a source line built from its file name and page
    /// label (`N/A` when absent) followed by its text.
    pub fn compose(&self, results: &[RetrievalResult]) -> ComposedContext {
        if results.is_empty() {
            return ComposedContext::NoRelevantDocuments;
        }

        let mut block = String::from(CONTEXT_HEADER);
        block.push_str("\n\n");
        for result in results {
            let source = result.metadata.file_name.as_deref().unwrap_or(NOT_AVAILABLE);
            let page = result.metadata.page_label.as_deref().unwrap_or(NOT_AVAILABLE);
            block.push_str(&format!("- Source: {}, Page: {}\n", source, page));
            block.push_str(&format!("  Content: {}\n\n", result.text));
        }

        ComposedContext::Passages(block.trim_end().to_string())
    }

    /// The full system prompt: persona followed by the context block.
    pub fn system_context(&self, context: &ComposedContext) -> String {
        if self.system_prompt.is_empty() {
            context.to_string()
        } else {
            format!("{}\n\n{}", self.system_prompt, context)
        }
    }

    /// Start generation lazily and relay its fragments.
    pub fn answer(
        &self,
        generator: Arc<dyn GenerationPort>,
        context: &ComposedContext,
        user_message: &str,
    ) -> AnswerStream {
        let system = self.system_context(context);
        let user = user_message.to_string();
        let fallback = self.fallback.clone();

        stream::once(async move { generator.generate(&system, &user).await })
            .flat_map(move |started| match started {
                Ok(upstream) => relay(upstream, fallback.clone()),
                Err(err) => {
                    tracing::error!(error = %err, "generation failed to start");
                    stream::iter([fallback.clone()]).boxed()
                }
            })
            .boxed()
    }
}

/// Forward non-empty fragments; on the first error emit `fallback` and stop.
pub fn relay(upstream: FragmentStream, fallback: String) -> AnswerStream {
    stream::unfold(Some((upstream, fallback)), |state| async move {
        let Some((mut upstream, fallback)) = state else {
            return None;
        };
        loop {
            match upstream.next().await {
                Some(Ok(fragment)) if fragment.is_empty() => continue,
                Some(Ok(fragment)) => return Some((fragment, Some((upstream, fallback)))),
                Some(Err(err)) => {
                    tracing::error!(error = %err, "generation stream broke");
                    return Some((fallback, None));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
