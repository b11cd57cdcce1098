//! Chat client trait and provider implementations

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{ChatRequest, Result, TokenStream, stream::collect_text};

/// A resolved, ready-to-call chat model
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Stream a response token by token.
    ///
    /// Cancelling `cancel` aborts the upstream request; the returned stream then
    /// ends without a further item.
    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken)
    -> Result<TokenStream>;

    /// Run a request to completion and return the full text
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let stream = self.stream(request, CancellationToken::new()).await?;
        collect_text(stream).await
    }
}

/// A chat client shared across tasks
pub type SharedChatClient = Arc<dyn ChatClient>;
