//! Context budgeting and compression.

pub mod budget;
pub mod compressor;
pub mod tokens;

pub use budget::{BudgetTable, ModelBudget};
pub use compressor::{Compressed, ContextCompressor, DEFAULT_MAX_MESSAGE_CHARS};
pub use tokens::{HeuristicTokenCounter, TokenCounter};
