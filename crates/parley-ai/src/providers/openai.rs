//! OpenAI-compatible Chat Completions API provider
//!
//! Covers OpenAI itself and every provider that speaks the same streaming
//! protocol (Moonshot, Zhipu, Qianfan, self-hosted gateways).

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    providers::ChatClient,
    stream::TokenStream,
    types::{ChatMessage, ChatRequest, DEFAULT_READ_TIMEOUT_SECS, ModelConfig, Role},
};

/// OpenAI-compatible API client bound to one model
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAIProvider {
    /// Create a provider from a model configuration
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let read_timeout = config.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS);
        builder = builder.read_timeout(Duration::from_secs(read_timeout));

        Ok(Self {
            client: builder.build()?,
            api_key: config.api_key()?,
            base_url: config.base_url()?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request(&self, request: &ChatRequest) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref system_prompt) = request.system_prompt {
            messages.push(OpenAIMessage {
                role: "system",
                content: system_prompt.clone(),
            });
        }

        messages.extend(request.messages.iter().map(convert_message));

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIProvider {
    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream> {
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(model = %self.model, %url, messages = body.messages.len(), "opening chat stream");

        let request_builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, cancel)))
    }
}

fn convert_message(msg: &ChatMessage) -> OpenAIMessage {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    OpenAIMessage {
        role,
        content: msg.content.clone(),
    }
}

/// Extract the text delta carried by one SSE data payload.
///
/// Returns `Ok(None)` for chunks without content (role headers, finish markers).
fn chunk_text(data: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data)?;

    if let Some(error) = chunk.error {
        return Err(Error::api(
            error.error_type.unwrap_or_else(|| "stream_error".to_string()),
            error.message,
        ));
    }

    let text: String = chunk
        .choices
        .iter()
        .filter_map(|choice| choice.delta.content.as_deref())
        .collect();

    Ok((!text.is_empty()).then_some(text))
}

fn create_stream(
    mut event_source: EventSource,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = Result<String>> {
    stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = event_source.next() => Some(event),
            };

            let Some(event) = next else {
                tracing::debug!("chat stream cancelled, closing upstream request");
                event_source.close();
                return;
            };

            let Some(event) = event else {
                break;
            };

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.trim() == "[DONE]" {
                        break;
                    }

                    match chunk_text(&msg.data) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            event_source.close();
                            yield Err(e);
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::Transport(e)) => {
                    event_source.close();
                    tracing::debug!(error = %e, timeout = e.is_timeout(), "chat stream transport failed");
                    yield Err(Error::Http(e));
                    return;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield Err(Error::from_status(status.as_u16(), &body));
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield Err(Error::Sse(e.to_string()));
                    return;
                }
            }
        }

        event_source.close();
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
