//! Token streaming types and utilities

use std::pin::Pin;

use futures::StreamExt;
use tokio_stream::Stream;

use crate::error::Result;

/// A stream of text deltas from a chat model.
///
/// An `Err` item means the upstream call failed; providers stop yielding after it.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Drain a token stream into the full response text
pub async fn collect_text(mut stream: TokenStream) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta?);
    }
    Ok(text)
}

/// Build a token stream from a fixed list of deltas
pub fn from_deltas<I, S>(deltas: I) -> TokenStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let items: Vec<Result<String>> = deltas.into_iter().map(|d| Ok(d.into())).collect();
    Box::pin(tokio_stream::iter(items))
}
