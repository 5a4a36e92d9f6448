//! Core types shared across the runtime.

pub mod generation;
pub mod message;
pub mod stream;
pub mod tool_call;
pub mod usage;

pub use generation::*;
pub use message::*;
pub use stream::*;
pub use tool_call::*;
pub use usage::*;
