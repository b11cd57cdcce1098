//! Event pipeline: frames a source stream with `Start` and exactly one terminal

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use tokio_stream::Stream;

use crate::{events::GenerationEvent, source::SourceStream};

/// A framed, infallible stream of generation events
pub type EventStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// Wrap a source so the result starts with `Start` and ends with exactly one
/// terminal event.
///
/// A terminal event from the source ends the pipeline as-is; a failed item
/// becomes an `Error` event; otherwise exhaustion yields `End`.
pub fn assemble(source: SourceStream) -> EventStream {
    Box::pin(stream! {
        let mut source = source;
        yield GenerationEvent::start();

        while let Some(item) = source.next().await {
            match item {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    yield event;
                    if terminal {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "event source failed");
                    yield GenerationEvent::error(e);
                    return;
                }
            }
        }

        yield GenerationEvent::end();
    })
}
