//! Test doubles shared by the engine's unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_ai::{ChatClient, ChatRequest, ModelResolver, SharedChatClient, TokenStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    models::Message,
    repository::{InMemoryMessageRepository, MessageRepository},
};

/// A chat client that replays fixed deltas.
///
/// With a gate, every delta after the first waits for a permit, so a test can
/// act between two chunks.
pub(crate) struct ScriptedClient {
    deltas: Vec<String>,
    fail_with: Option<String>,
    open_error: Option<String>,
    gate: Option<Arc<Semaphore>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            fail_with: None,
            open_error: None,
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail with an upstream error after the deltas
    pub(crate) fn failing_after(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    /// Fail before producing any stream
    pub(crate) fn failing_to_open(mut self, message: &str) -> Self {
        self.open_error = Some(message.to_string());
        self
    }

    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn stream(
        &self,
        request: &ChatRequest,
        _cancel: CancellationToken,
    ) -> parley_ai::Result<TokenStream> {
        self.requests.lock().push(request.clone());
        if let Some(message) = &self.open_error {
            return Err(parley_ai::Error::Sse(message.clone()));
        }

        let deltas = self.deltas.clone();
        let fail_with = self.fail_with.clone();
        let gate = self.gate.clone();
        Ok(Box::pin(stream! {
            for (i, delta) in deltas.into_iter().enumerate() {
                if i > 0 {
                    if let Some(gate) = &gate {
                        if let Ok(permit) = gate.acquire().await {
                            permit.forget();
                        }
                    }
                }
                yield Ok(delta);
            }
            if let Some(message) = fail_with {
                yield Err(parley_ai::Error::Sse(message));
            }
        }))
    }
}

/// Resolves every scope to the same client, or to nothing
pub(crate) struct ScriptedResolver {
    client: Option<SharedChatClient>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedResolver {
    pub(crate) fn new(client: Arc<ScriptedClient>) -> Self {
        Self {
            client: Some(client),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unconfigured() -> Self {
        Self {
            client: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModelResolver for ScriptedResolver {
    async fn resolve_chat_client(
        &self,
        workspace_uid: &str,
        bot_uid: Option<&str>,
    ) -> parley_ai::Result<SharedChatClient> {
        self.calls
            .lock()
            .push((workspace_uid.to_string(), bot_uid.map(str::to_string)));
        self.client
            .clone()
            .ok_or_else(|| parley_ai::Error::ModelNotFound(workspace_uid.to_string()))
    }
}

/// An in-memory message repository that counts batch writes and can fail them
#[derive(Default)]
pub(crate) struct CountingMessages {
    pub(crate) inner: InMemoryMessageRepository,
    batches: AtomicUsize,
    fail_batches: AtomicBool,
}

impl CountingMessages {
    pub(crate) fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_batches(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageRepository for CountingMessages {
    async fn add(&self, message: Message) -> Result<Message> {
        self.inner.add(message).await
    }

    async fn add_batch(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(Error::Repository("database unavailable".into()));
        }
        self.inner.add_batch(messages).await
    }

    async fn find_latest(
        &self,
        conversation_uid: &str,
        count: usize,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.inner
            .find_latest(conversation_uid, count, reset_message_uid)
            .await
    }

    async fn find_after_uid(
        &self,
        conversation_uid: &str,
        after_uid: Option<&str>,
        limit: Option<usize>,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.inner
            .find_after_uid(conversation_uid, after_uid, limit, reset_message_uid)
            .await
    }

    async fn find_before_uid(
        &self,
        conversation_uid: &str,
        before_uid: &str,
        limit: usize,
        reset_message_uid: Option<&str>,
    ) -> Result<Vec<Message>> {
        self.inner
            .find_before_uid(conversation_uid, before_uid, limit, reset_message_uid)
            .await
    }

    async fn count_after_uid(
        &self,
        conversation_uid: &str,
        after_uid: Option<&str>,
        reset_message_uid: Option<&str>,
    ) -> Result<usize> {
        self.inner
            .count_after_uid(conversation_uid, after_uid, reset_message_uid)
            .await
    }
}
