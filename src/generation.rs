//! Streaming chat-completion client.
//!
//! [`OpenAiGenerator`] sends one system and one user message to
//! `POST {url}/chat/completions` with `stream: true` and turns the
//! server-sent events of the response into a [`FragmentStream`].
//!
//! # Wire format
//!
//! The response body is a sequence of `data:` lines separated by blank
//! lines. Each payload is a JSON chunk whose text lives at
//! `choices[0].delta.content`; the literal payload `[DONE]` ends the stream.
//! Lines may be split across network reads, so bytes are buffered until a
//! full line is available.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use ragline_core::{FragmentStream, GenerationError, GenerationPort, SessionKey};

const TRACING_TARGET: &str = "ragline::generation";

/// Completion client bound to one key and model.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    key: SessionKey,
}

impl OpenAiGenerator {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        model: impl Into<String>,
        key: SessionKey,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            model: model.into(),
            key,
        }
    }
}

#[async_trait]
impl GenerationPort for OpenAiGenerator {
    async fn generate(
        &self,
        system_context: &str,
        user_message: &str,
    ) -> Result<FragmentStream, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": system_context},
                {"role": "user", "content": user_message},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .bearer_auth(self.key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!(
                "completion API error {}: {}",
                status, body_text
            )));
        }

        tracing::debug!(target: TRACING_TARGET, model = %self.model, "completion stream opened");
        Ok(completion_fragments(response.bytes_stream()))
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `data:` line decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(parse_line(&line));
        }
        events
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(line);
    let payload = line
        .trim_end_matches(|c: char| c == '\r' || c == '\n')
        .strip_prefix("data:")?
        .trim_start();
    match payload {
        "" => None,
        "[DONE]" => Some(SseEvent::Done),
        other => Some(SseEvent::Data(other.to_string())),
    }
}

/// Text carried by one completion chunk, if any.
fn delta_content(payload: &str) -> Result<Option<String>, GenerationError> {
    let json: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| GenerationError::Stream(format!("malformed chunk: {}", e)))?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("provider reported an error");
        return Err(GenerationError::Stream(message.to_string()));
    }

    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

struct FragmentState<S> {
    upstream: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Decode a completion response body into text fragments.
///
/// The stream ends at `[DONE]` or at the end of the body. A transport
/// error or a malformed chunk is yielded once, then the stream ends.
pub fn completion_fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = FragmentState {
        upstream: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                match event {
                    SseEvent::Done => return None,
                    SseEvent::Data(payload) => match delta_content(&payload) {
                        Ok(Some(text)) => return Some((Ok(text), st)),
                        Ok(None) => continue,
                        Err(err) => {
                            st.pending.clear();
                            st.finished = true;
                            return Some((Err(err), st));
                        }
                    },
                }
            }
            if st.finished {
                return None;
            }
            match st.upstream.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(bytes.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(err)) => {
                    st.finished = true;
                    return Some((Err(GenerationError::Stream(err.to_string())), st));
                }
                None => {
                    st.finished = true;
                    let events = st.decoder.finish();
                    st.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}
