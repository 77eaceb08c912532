use crate::rivulet::RivuletConfig;

/// Called automatically by `RivuletConfig::from_str` / `load`.
pub(crate) fn validate(config: &RivuletConfig) -> anyhow::Result<()> {
    if config.pipeline.script.as_os_str().is_empty() {
        anyhow::bail!("pipeline.script must not be empty");
    }

    // vars keys must be valid identifiers: [A-Za-z_][A-Za-z0-9_]*
    for key in config.vars.keys() {
        if !is_valid_ident(key) {
            anyhow::bail!("vars: invalid variable name {key:?}, must match [A-Za-z_][A-Za-z0-9_]*");
        }
    }

    for bin in &config.binning {
        if !is_valid_ident(&bin.name) {
            anyhow::bail!("binning: invalid method name {:?}", bin.name);
        }
        if bin.max_buckets == 0 {
            anyhow::bail!("binning.{}: max_buckets must be > 0", bin.name);
        }
        if bin.intervals.is_empty() {
            anyhow::bail!("binning.{}: intervals must not be empty", bin.name);
        }
        if let Some(bad) = bin.intervals.iter().find(|i| !i.is_finite() || **i <= 0.0) {
            anyhow::bail!("binning.{}: interval {bad} must be positive", bin.name);
        }
        if bin.intervals.windows(2).any(|w| w[1] <= w[0]) {
            anyhow::bail!("binning.{}: intervals must be strictly increasing", bin.name);
        }
    }

    Ok(())
}

/// Starts with an ASCII letter or underscore, followed by ASCII
/// alphanumerics or underscores.
fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.bytes();
    match chars.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    chars.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
