//! Generation settings passed through to the provider.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Settings controlling a provider call.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub tool_choice: Option<ToolChoice>,
    /// Request an incremental event stream instead of one response.
    pub stream: Option<bool>,
}

impl GenerationSettings {
    /// Whether streaming was requested (defaults to true).
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(true)
    }
}

/// How the provider may pick structured tools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}
