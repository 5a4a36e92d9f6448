//! Configuration system (layered: code > env > config file).

pub mod run;

pub use run::{ConcurrencyMode, RunConfiguration, TerminationPolicy};

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::budget::BudgetTable;
use crate::error::RuntimeError;

const CONFIG_DIR: &str = ".threadloop";
const CONFIG_FILE: &str = "config.toml";

const ENV_USE_TAGGED_SYNTAX: &str = "THREADLOOP_USE_TAGGED_SYNTAX";
const ENV_USE_STRUCTURED_CALLS: &str = "THREADLOOP_USE_STRUCTURED_CALLS";
const ENV_EXECUTE_TOOLS: &str = "THREADLOOP_EXECUTE_TOOLS";
const ENV_EXECUTE_ON_STREAM: &str = "THREADLOOP_EXECUTE_ON_STREAM";
const ENV_CONCURRENCY: &str = "THREADLOOP_CONCURRENCY";
const ENV_MAX_TAGGED_CALLS: &str = "THREADLOOP_MAX_TAGGED_CALLS";
const ENV_MAX_AUTO_CONTINUES: &str = "THREADLOOP_MAX_AUTO_CONTINUES";
const ENV_TOOL_TIMEOUT_MS: &str = "THREADLOOP_TOOL_TIMEOUT_MS";
const ENV_DEFAULT_MODEL: &str = "THREADLOOP_MODEL";

/// Process-level settings from which per-run configurations are derived.
///
/// Resolution order:
/// 1. values set in code on the returned struct
/// 2. `THREADLOOP_*` environment variables (a `.env` file is honoured)
/// 3. `~/.threadloop/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSettings {
    pub default_model: Option<String>,
    pub run: RunConfiguration,
    pub budgets: BudgetTable,
}

impl RuntimeSettings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, RuntimeError> {
        toml::from_str(raw)
            .map_err(|e| RuntimeError::Configuration(format!("invalid config file: {e}")))
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Default config file location, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        directories::UserDirs::new().map(|dirs| dirs.home_dir().join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// File layer (if present) with environment overrides on top.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut settings = match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.run.validate()?;
        Ok(settings)
    }

    /// Apply overrides from a key lookup (the environment, in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let run = &mut self.run;
        if let Some(v) = parse_var::<bool, _>(&lookup, ENV_USE_TAGGED_SYNTAX)? {
            run.use_tagged_syntax = v;
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, ENV_USE_STRUCTURED_CALLS)? {
            run.use_structured_calls = v;
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, ENV_EXECUTE_TOOLS)? {
            run.execute_tools = v;
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, ENV_EXECUTE_ON_STREAM)? {
            run.execute_on_stream = v;
        }
        if let Some(v) = parse_var::<ConcurrencyMode, _>(&lookup, ENV_CONCURRENCY)? {
            run.concurrency = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_TAGGED_CALLS)? {
            run.max_tagged_calls_per_turn = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_AUTO_CONTINUES)? {
            run.max_auto_continues = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, ENV_TOOL_TIMEOUT_MS)? {
            run.tool_timeout_ms = Some(v);
        }
        if let Some(model) = lookup(ENV_DEFAULT_MODEL).filter(|m| !m.trim().is_empty()) {
            self.default_model = Some(model);
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, RuntimeError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .to_ascii_lowercase()
        .parse::<T>()
        .map(Some)
        .map_err(|_| RuntimeError::Configuration(format!("{key} has an invalid value: '{raw}'")))
}
