use serde::Deserialize;

/// Default bucket budget for configured bin reducers.
pub const DEFAULT_MAX_BUCKETS: usize = 10;

/// Raw `[binning.<name>]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BinningRaw {
    #[serde(default = "default_max_buckets")]
    max_buckets: usize,
    intervals: Vec<f64>,
    #[serde(default = "default_warn")]
    warn: bool,
}

fn default_max_buckets() -> usize {
    DEFAULT_MAX_BUCKETS
}

fn default_warn() -> bool {
    true
}

impl BinningRaw {
    pub(crate) fn resolve(self, name: String) -> BinningConfig {
        BinningConfig {
            name,
            max_buckets: self.max_buckets,
            intervals: self.intervals,
            warn: self.warn,
        }
    }
}

/// A bin reducer method installed into the expression engine under `name`.
/// Reusing a built-in name (`dynamicBin`, `dynamicTimeBin`) redefines it.
#[derive(Debug, Clone, PartialEq)]
pub struct BinningConfig {
    pub name: String,
    pub max_buckets: usize,
    /// Candidate bucket widths, smallest first.
    pub intervals: Vec<f64>,
    /// Warn at startup when an interval does not divide by its predecessor.
    pub warn: bool,
}
