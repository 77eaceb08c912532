use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::binning::{BinningConfig, BinningRaw};
use crate::logging::LoggingConfig;
use crate::pipeline::PipelineConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RivuletConfigRaw {
    pipeline: PipelineConfig,
    /// Exposed to expressions as `$`.
    #[serde(default)]
    context: Map<String, Value>,
    /// Variables for `$VAR` / `${VAR:default}` preprocessing.
    #[serde(default)]
    vars: HashMap<String, String>,
    #[serde(default)]
    binning: HashMap<String, BinningRaw>,
    #[serde(default)]
    logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// RivuletConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RivuletConfig {
    pub pipeline: PipelineConfig,
    /// Always an object; empty when `[context]` is absent.
    pub context: Value,
    pub vars: HashMap<String, String>,
    /// Sorted by name.
    pub binning: Vec<BinningConfig>,
    pub logging: LoggingConfig,
}

impl RivuletConfig {
    /// Read and parse a `rivulet.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for RivuletConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`RivuletConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: RivuletConfigRaw = toml::from_str(toml_str)?;

        let mut binning: Vec<BinningConfig> = raw
            .binning
            .into_iter()
            .map(|(name, table)| table.resolve(name))
            .collect();
        binning.sort_by(|a, b| a.name.cmp(&b.name));

        let config = RivuletConfig {
            pipeline: raw.pipeline,
            context: Value::Object(raw.context),
            vars: raw.vars,
            binning,
            logging: raw.logging,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::logging::LogFormat;

    const FULL_TOML: &str = r#"
[pipeline]
script = "pipelines/main.rv"
ordered_async = true

[context]
threshold = 5
labels = ["a", "b"]

[context.limits]
max = 2.5

[vars]
LIMIT = "10"

[binning.latencyBin]
max_buckets = 6
intervals = [1, 5, 10]

[binning.dynamicBin]
intervals = [2, 4]
warn = false

[logging]
level = "debug"
format = "json"
file = "logs/rivulet.log"
modules = { "rv_core" = "trace" }
"#;

    #[test]
    fn load_full_toml() {
        let cfg: RivuletConfig = FULL_TOML.parse().unwrap();

        assert_eq!(cfg.pipeline.script, PathBuf::from("pipelines/main.rv"));
        assert!(cfg.pipeline.ordered_async);
        assert_eq!(
            cfg.context,
            json!({"threshold": 5, "labels": ["a", "b"], "limits": {"max": 2.5}})
        );
        assert_eq!(cfg.vars["LIMIT"], "10");

        assert_eq!(cfg.binning.len(), 2);
        assert_eq!(cfg.binning[0].name, "dynamicBin");
        assert_eq!(cfg.binning[0].max_buckets, 10);
        assert!(!cfg.binning[0].warn);
        assert_eq!(cfg.binning[1].name, "latencyBin");
        assert_eq!(cfg.binning[1].intervals, vec![1.0, 5.0, 10.0]);
        assert!(cfg.binning[1].warn);

        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.file, Some(PathBuf::from("logs/rivulet.log")));
        assert_eq!(cfg.logging.modules["rv_core"], "trace");
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let cfg: RivuletConfig = "[pipeline]\nscript = \"a.rv\"\n".parse().unwrap();
        assert!(!cfg.pipeline.ordered_async);
        assert_eq!(cfg.context, json!({}));
        assert!(cfg.vars.is_empty());
        assert!(cfg.binning.is_empty());
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Plain);
    }

    #[test]
    fn missing_pipeline_fails() {
        assert!("[context]\na = 1\n".parse::<RivuletConfig>().is_err());
    }

    #[test]
    fn script_resolves_against_base_dir() {
        let cfg: RivuletConfig = FULL_TOML.parse().unwrap();
        assert_eq!(
            cfg.pipeline.script_path(Path::new("/etc/rivulet")),
            PathBuf::from("/etc/rivulet/pipelines/main.rv")
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rivulet.toml");
        std::fs::write(&path, FULL_TOML).unwrap();
        let cfg = RivuletConfig::load(&path).unwrap();
        assert_eq!(cfg.binning.len(), 2);

        let err = RivuletConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn unknown_binning_keys_are_rejected() {
        let toml = FULL_TOML.replace("warn = false", "wran = false");
        assert!(toml.parse::<RivuletConfig>().is_err());
    }
}
