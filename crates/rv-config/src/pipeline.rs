use std::path::{Path, PathBuf};

use serde::Deserialize;

/// The `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline source file, relative to the config file.
    pub script: PathBuf,
    /// Keep async stage output in input order.
    #[serde(default)]
    pub ordered_async: bool,
}

impl PipelineConfig {
    pub fn script_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.script)
    }
}
