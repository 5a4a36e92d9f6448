//! threadloop: tool-calling conversation runtime for LLM agents.
//!
//! Drives one conversational turn against a model provider: builds the
//! context window from a persisted thread, interprets the streamed response
//! (structured tool calls and XML-style tagged calls alike), runs the
//! requested tools, and automatically continues until the model stops, a
//! turn-ending tool is called, or a limit is reached.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use threadloop::prelude::*;
//! use threadloop::provider::openai_compatible::OpenAiCompatibleProvider;
//!
//! # async fn example() -> threadloop::error::Result<()> {
//! let store = Arc::new(InMemoryThreadStore::new());
//! let registry = Arc::new(ToolRegistry::new());
//! let provider = Arc::new(OpenAiCompatibleProvider::from_env());
//! let runtime = ThreadRuntime::new(provider, store.clone(), registry);
//!
//! let thread_id = uuid::Uuid::new_v4();
//! store.append(thread_id, NewMessage::user("Hello!")).await?;
//!
//! let mut chunks = runtime.run_turn(TurnRequest::new(thread_id, "gpt-4o", "Be brief."))?;
//! while let Some(chunk) = chunks.next().await {
//!     if let StreamChunk::ContentDelta { text } = chunk {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod observe;
pub mod prelude;
pub mod provider;
pub mod thread;
pub mod tools;
pub mod types;
pub mod util;
