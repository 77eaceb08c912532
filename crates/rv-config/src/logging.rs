use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// `[logging]` in `rivulet.toml`; may be omitted entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for everything not listed in `modules`.
    pub level: String,
    /// Per-module overrides, e.g. `{ "rv_core::operator" = "debug" }`.
    pub modules: HashMap<String, String>,
    /// Extra copy of the log, next to the config file when relative.
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: HashMap::new(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}
