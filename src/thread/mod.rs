//! Threads: persistence contract and the turn runtime.

pub mod runtime;
pub mod store;

pub use runtime::{ThreadRuntime, TurnPhase, TurnRequest};
pub use store::{InMemoryThreadStore, ThreadStore};
