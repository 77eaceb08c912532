use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Read a pipeline script and substitute `$VAR` / `${VAR:default}` from
/// `vars`. Undefined variables without a default are errors.
pub fn load_script(path: &Path, vars: &HashMap<String, String>) -> Result<String> {
    let source = read(path)?;
    rv_lang::preprocess_vars(&source, vars).with_context(|| format!("preprocessing {}", path.display()))
}

/// Like [`load_script`], but names missing from `vars` fall back to
/// environment variables.
pub fn load_script_with_env(path: &Path, vars: &HashMap<String, String>) -> Result<String> {
    let source = read(path)?;
    rv_lang::preprocess_vars_with_env(&source, vars)
        .with_context(|| format!("preprocessing {}", path.display()))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Parse `KEY=VALUE` assignments from CLI arguments.
pub fn parse_vars(var_args: &[String]) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for arg in var_args {
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("invalid --var format: expected KEY=VALUE, got '{}'", arg)
        })?;
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parse_vars_splits_on_first_equals() {
        let vars = parse_vars(&["A=1".into(), "EXPR=a=b".into()]).unwrap();
        assert_eq!(vars["A"], "1");
        assert_eq!(vars["EXPR"], "a=b");
    }

    #[test]
    fn parse_vars_rejects_missing_equals() {
        let err = parse_vars(&["NOPE".into()]).unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn load_script_substitutes_variables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "take $LIMIT\nmap @ * ${{FACTOR:2}}\nfilter @ > $.min").unwrap();
        let vars = HashMap::from([("LIMIT".to_string(), "3".to_string())]);
        let source = load_script(file.path(), &vars).unwrap();
        assert_eq!(source, "take 3\nmap @ * 2\nfilter @ > $.min\n");
    }

    #[test]
    fn load_script_reports_undefined_variables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "take $RIVULET_SURELY_UNDEFINED").unwrap();
        let err = load_script(file.path(), &HashMap::new()).unwrap_err();
        assert!(format!("{err:#}").contains("RIVULET_SURELY_UNDEFINED"));
    }

    #[test]
    fn load_script_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_script(&dir.path().join("absent.rv"), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("absent.rv"));
    }
}
