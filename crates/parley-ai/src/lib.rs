//! parley-ai: Chat model provider abstraction
//!
//! This crate provides the streaming chat client interface used by the
//! generation engine, an OpenAI-compatible provider, and the resolver that
//! turns a workspace (and optional bot) into a configured client.

pub mod error;
pub mod providers;
pub mod resolver;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{ChatClient, SharedChatClient};
pub use resolver::{ConfiguredResolver, ModelCatalog, ModelResolver};
pub use stream::TokenStream;
pub use types::*;
