//! Model event source: turns a chat model's token stream into generation events

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use parley_ai::{ChatRequest, SharedChatClient};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::{error::Result, events::GenerationEvent, models::new_uid};

/// A fallible stream of generation events from some producer
pub type SourceStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send>>;

/// Streams one chat request as `Chunk` events sharing a single section.
///
/// The adapter yields chunks and, on upstream failure, one `Error` event; it
/// never emits `Start` or `End`. When the token is cancelled it stops pulling
/// and the upstream request is dropped.
pub struct ModelEventSource {
    client: SharedChatClient,
    request: ChatRequest,
    cancel: CancellationToken,
    section_uid: String,
}

impl ModelEventSource {
    pub fn new(client: SharedChatClient, request: ChatRequest, cancel: CancellationToken) -> Self {
        Self {
            client,
            request,
            cancel,
            section_uid: new_uid(),
        }
    }

    pub fn section_uid(&self) -> &str {
        &self.section_uid
    }

    pub fn into_stream(self) -> SourceStream {
        let Self {
            client,
            request,
            cancel,
            section_uid,
        } = self;

        Box::pin(stream! {
            let mut tokens = match client.stream(&request, cancel.clone()).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open model stream");
                    yield Ok(GenerationEvent::error(e));
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    delta = tokens.next() => Some(delta),
                };

                let Some(delta) = next else {
                    tracing::debug!(%section_uid, "model stream cancelled");
                    return;
                };

                match delta {
                    None => break,
                    Some(Ok(text)) if text.is_empty() => {}
                    Some(Ok(text)) => yield Ok(GenerationEvent::chunk(section_uid.clone(), text)),
                    Some(Err(e)) => {
                        tracing::warn!(%section_uid, error = %e, "model stream failed");
                        yield Ok(GenerationEvent::error(e));
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::testing::ScriptedClient;

    async fn collect(source: SourceStream) -> Vec<GenerationEvent> {
        source.map(|e| e.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_chunks_share_one_section() {
        let client = Arc::new(ScriptedClient::new(["Hel", "", "lo"]));
        let source = ModelEventSource::new(client, ChatRequest::default(), CancellationToken::new());
        let section = source.section_uid().to_string();
        let events = collect(source.into_stream()).await;
        assert_eq!(
            events,
            vec![
                GenerationEvent::chunk(section.clone(), "Hel"),
                GenerationEvent::chunk(section, "lo"),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_becomes_single_error() {
        let client = Arc::new(ScriptedClient::new(["a", "b"]).failing_after("socket closed"));
        let source = ModelEventSource::new(client, ChatRequest::default(), CancellationToken::new());
        let section = source.section_uid().to_string();
        let events = collect(source.into_stream()).await;
        assert_eq!(events.len(), 3);
        match &events[2] {
            GenerationEvent::Error { section_uid, cause } => {
                assert_ne!(section_uid, &section);
                assert!(cause.contains("socket closed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_failure_becomes_error() {
        let client = Arc::new(ScriptedClient::new(["never"]).failing_to_open("refused"));
        let source = ModelEventSource::new(client, ChatRequest::default(), CancellationToken::new());
        let events = collect(source.into_stream()).await;
        assert!(matches!(events.as_slice(), [GenerationEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_cancel_stops_pulling() {
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(ScriptedClient::new(["a", "b", "c"]).gated(gate.clone()));
        let cancel = CancellationToken::new();
        let mut stream =
            ModelEventSource::new(client, ChatRequest::default(), cancel.clone()).into_stream();

        assert!(matches!(
            stream.next().await,
            Some(Ok(GenerationEvent::Chunk { .. }))
        ));
        cancel.cancel();
        gate.add_permits(2);
        assert!(stream.next().await.is_none());
    }
}
