//! Dynamic bin reducer: a bounded-memory histogram over numeric (or time)
//! keys that coarsens its bucket width as the key range grows.
//!
//! An aggregate maps bucket keys to running statistics. Numeric buckets are
//! capped at a configured maximum; when a push would exceed it, the reducer
//! moves to the next interval width and condenses existing buckets into the
//! wider ones. Non-numeric keys get their own label buckets outside the cap.
//!
//! Per-aggregate state (current interval index, label count, float flag)
//! lives in an [`IntervalCache`] side table keyed by the aggregate's key set.
//! The cache is an optimisation only: [`BinReducer::recompute_meta`] derives
//! the same state from the buckets themselves.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::value::{as_numeric, num, to_number, to_text};

mod cache;

pub use cache::{AggregateId, IntervalCache};


const NUMERIC_INTERVALS: [f64; 17] = [
    1.0, 5.0, 10.0, 20.0, 100.0, 200.0, 1e3, 5e3, 1e4, 5e4, 1e5, 5e5, 1e6, 5e6, 1e7, 5e7, 1e8,
];

const TIME_INTERVALS_SECS: [f64; 13] = [
    30.0,
    60.0,
    300.0,
    900.0,
    1800.0,
    3600.0,
    7200.0,
    14400.0,
    28800.0,
    86400.0,
    259200.0,
    604800.0,
    2592000.0,
];

pub const DEFAULT_MAX_BUCKETS: usize = 10;

// ---------------------------------------------------------------------------
// Bucket keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum BucketKey {
    /// A single integral key, used only while the scale is 1 and no
    /// fractional key has been seen.
    Point(f64),
    /// `lo .. hi`, half-open.
    Range { lo: f64, hi: f64 },
    /// A non-numeric key, kept verbatim.
    Label(String),
}

impl BucketKey {
    fn range(lo: f64, hi: f64) -> Self {
        BucketKey::Range {
            lo: lo + 0.0,
            hi: hi + 0.0,
        }
    }

    /// Numeric start of the bucket; `None` for labels.
    pub fn start(&self) -> Option<f64> {
        match self {
            BucketKey::Point(p) => Some(*p),
            BucketKey::Range { lo, .. } => Some(*lo),
            BucketKey::Label(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, BucketKey::Label(_))
    }

    /// Reads the `Display` form of a numeric key back: `"5"` is a point,
    /// `"30-60"` (or `"-60--30"`) a range. Text that does not render back
    /// to itself is not a numeric key.
    fn parse_numeric(text: &str) -> Option<Self> {
        let key = match text.parse::<f64>() {
            Ok(p) => BucketKey::Point(p + 0.0),
            Err(_) => {
                let (i, _) = text.char_indices().skip(1).find(|(_, c)| *c == '-')?;
                let lo = text[..i].parse::<f64>().ok()?;
                let hi = text[i + 1..].parse::<f64>().ok()?;
                BucketKey::range(lo, hi)
            }
        };
        (key.to_string() == text).then_some(key)
    }
}

impl PartialEq for BucketKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BucketKey::Point(a), BucketKey::Point(b)) => a.to_bits() == b.to_bits(),
            (BucketKey::Range { lo: a, hi: b }, BucketKey::Range { lo: c, hi: d }) => {
                a.to_bits() == c.to_bits() && b.to_bits() == d.to_bits()
            }
            (BucketKey::Label(a), BucketKey::Label(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for BucketKey {}

impl Hash for BucketKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            BucketKey::Point(p) => p.to_bits().hash(state),
            BucketKey::Range { lo, hi } => {
                lo.to_bits().hash(state);
                hi.to_bits().hash(state);
            }
            BucketKey::Label(l) => l.hash(state),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Point(p) => f.write_str(&to_text(&num(*p))),
            BucketKey::Range { lo, hi } => {
                write!(f, "{}-{}", to_text(&num(*lo)), to_text(&num(*hi)))
            }
            BucketKey::Label(l) => f.write_str(l),
        }
    }
}

fn key_order(a: &BucketKey, b: &BucketKey) -> Ordering {
    match (a.start(), b.start()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinStats {
    pub count: u64,
    pub sum: f64,
    pub sum2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for BinStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum2: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }
}

impl BinStats {
    pub fn single(value: f64) -> Self {
        let mut stats = Self::default();
        stats.push(value);
        stats
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum2 += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Additive merge; min/max take the extremum.
    pub fn merge(&mut self, other: &BinStats) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum2 += other.sum2;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        self.sum / self.count as f64
    }

    /// Sample variance; zero below two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        ((n * self.sum2 - self.sum * self.sum) / (n * (n - 1.0))).max(0.0)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(5);
        map.insert("count".into(), Value::from(self.count));
        map.insert("sum".into(), num(self.sum));
        map.insert("sum2".into(), num(self.sum2));
        map.insert("min".into(), num(self.min));
        map.insert("max".into(), num(self.max));
        Value::Object(map)
    }

    /// Reads `{count, sum, sum2?, min?, max?}`. `None` unless the value is
    /// an object carrying a numeric `count`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let count = map.get("count").and_then(as_numeric)?;
        let field = |name: &str, fallback: f64| map.get(name).and_then(as_numeric).unwrap_or(fallback);
        Some(Self {
            count: count.max(0.0) as u64,
            sum: field("sum", 0.0),
            sum2: field("sum2", 0.0),
            min: field("min", f64::MAX),
            max: field("max", f64::MIN),
        })
    }

    /// `{min, max, count, sum, average, variance, stddev}`.
    pub fn summary(&self) -> Value {
        let variance = self.variance();
        let mut map = Map::with_capacity(7);
        map.insert("min".into(), num(self.min));
        map.insert("max".into(), num(self.max));
        map.insert("count".into(), Value::from(self.count));
        map.insert("sum".into(), num(self.sum));
        map.insert("average".into(), num(self.average()));
        map.insert("variance".into(), num(variance));
        map.insert("stddev".into(), num(variance.sqrt()));
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinAggregate(IndexMap<BucketKey, BinStats>);

impl BinAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn numeric_len(&self) -> usize {
        self.0.keys().filter(|k| k.is_numeric()).count()
    }

    pub fn label_len(&self) -> usize {
        self.len() - self.numeric_len()
    }

    pub fn total_count(&self) -> u64 {
        self.0.values().map(|s| s.count).sum()
    }

    pub fn get(&self, key: &BucketKey) -> Option<&BinStats> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &BinStats)> {
        self.0.iter()
    }

    fn merge_into(&mut self, key: BucketKey, stats: &BinStats) {
        self.0.entry(key).or_default().merge(stats);
    }

    fn sort(&mut self) {
        self.0.sort_by(|a, _, b, _| key_order(a, b));
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, s)| (k.to_string(), s.to_value()))
                .collect(),
        )
    }

}

impl FromIterator<(BucketKey, BinStats)> for BinAggregate {
    fn from_iter<I: IntoIterator<Item = (BucketKey, BinStats)>>(iter: I) -> Self {
        let mut agg = Self::new();
        for (key, stats) in iter {
            agg.merge_into(key, &stats);
        }
        agg
    }
}

/// Re-key every numeric bucket onto `scale`-wide boundaries, merging buckets
/// that collapse together. Labels pass through unchanged.
pub fn condense(agg: &BinAggregate, scale: f64) -> BinAggregate {
    let mut out = BinAggregate::new();
    for (key, stats) in agg.iter() {
        let key = match key.start() {
            Some(start) => {
                let lo = (start / scale).floor() * scale;
                BucketKey::range(lo, lo + scale)
            }
            None => key.clone(),
        };
        out.merge_into(key, stats);
    }
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SampleKey {
    Number(f64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub key: SampleKey,
    pub value: f64,
}

impl Sample {
    pub fn number(key: f64, value: f64) -> Self {
        Self {
            key: SampleKey::Number(key),
            value,
        }
    }

    pub fn label(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: SampleKey::Label(key.into()),
            value,
        }
    }

    /// Reads `{x, y}`. Numbers and numeric strings key numeric buckets,
    /// other non-null keys become labels. `y` must be numeric.
    pub fn from_value(value: &Value) -> Option<Self> {
        let x = value.get("x").filter(|x| !x.is_null())?;
        let y = to_number(value.get("y").unwrap_or(&Value::Null));
        if !y.is_finite() {
            return None;
        }
        let key = match as_numeric(x) {
            Some(n) => SampleKey::Number(n),
            None => SampleKey::Label(to_text(x)),
        };
        Some(Self { key, value: y })
    }
}

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// Per-aggregate state kept in the side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinMeta {
    pub interval: usize,
    pub labels: usize,
    pub float_seen: bool,
}

#[derive(Debug)]
pub struct BinReducer {
    max_buckets: usize,
    intervals: Vec<f64>,
    cache: IntervalCache,
}

impl BinReducer {
    pub fn new(max_buckets: usize, intervals: Vec<f64>, warn: bool) -> Self {
        let intervals = if intervals.is_empty() {
            vec![1.0]
        } else {
            intervals
        };
        if warn {
            for pos in non_dividing_positions(&intervals) {
                tracing::warn!(
                    position = pos,
                    interval = intervals[pos],
                    previous = intervals[pos - 1],
                    "binning may not be pure: interval does not divide by its predecessor"
                );
            }
        }
        Self {
            max_buckets: max_buckets.max(1),
            intervals,
            cache: IntervalCache::default(),
        }
    }

    /// Numeric histogram defaults (`dynamicBin`).
    pub fn numeric() -> Self {
        Self::new(DEFAULT_MAX_BUCKETS, NUMERIC_INTERVALS.to_vec(), false)
    }

    /// Millisecond time histogram defaults (`dynamicTimeBin`), 30s to 30d.
    pub fn time() -> Self {
        let intervals = TIME_INTERVALS_SECS.iter().map(|s| s * 1000.0).collect();
        Self::new(DEFAULT_MAX_BUCKETS, intervals, false)
    }

    pub fn with_cache(mut self, cache: IntervalCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    pub fn intervals(&self) -> &[f64] {
        &self.intervals
    }

    /// Bucket width at interval index `i`; past the configured list each
    /// step multiplies the last width by ten.
    pub fn scale(&self, i: usize) -> f64 {
        let len = self.intervals.len();
        match self.intervals.get(i) {
            Some(width) => *width,
            None => {
                let extra = i32::try_from(i + 1 - len).unwrap_or(i32::MAX);
                self.intervals[len - 1] * 10f64.powi(extra)
            }
        }
    }

    pub fn push(&self, agg: BinAggregate, sample: Sample) -> BinAggregate {
        self.push_limited(agg, sample, self.max_buckets)
    }

    /// Push with a per-call bucket limit instead of the configured maximum.
    pub fn push_limited(&self, mut agg: BinAggregate, sample: Sample, limit: usize) -> BinAggregate {
        let limit = limit.max(1);
        let old_id = AggregateId::of(&agg);
        let mut meta = self
            .cache
            .get(old_id)
            .unwrap_or_else(|| self.recompute_meta(&agg));
        let mut structural = false;

        let key = match sample.key {
            SampleKey::Label(label) => BucketKey::Label(label),
            SampleKey::Number(x) => {
                let scale = self.scale(meta.interval);
                if x.fract() != 0.0 && !meta.float_seen {
                    meta.float_seen = true;
                    if agg.keys().any(|k| matches!(k, BucketKey::Point(_))) {
                        agg = condense(&agg, scale);
                        structural = true;
                    }
                }
                bucket_for(x, scale, meta.float_seen)
            }
        };
        if agg.get(&key).is_none() {
            if !key.is_numeric() {
                meta.labels += 1;
            }
            structural = true;
        }
        agg.0.entry(key).or_default().push(sample.value);

        if agg.numeric_len() > limit {
            // Floor bucketing never merges a negative key with a non-negative one.
            let floor = if straddles_zero(&agg) { limit.max(2) } else { limit };
            if floor > limit {
                tracing::debug!(limit, floor, "keys straddle zero, bucket limit raised");
            }
            while agg.numeric_len() > floor {
                let next = self.scale(meta.interval + 1);
                if !next.is_finite() {
                    break;
                }
                meta.interval += 1;
                agg = condense(&agg, next);
                structural = true;
            }
        }

        if structural {
            agg.sort();
        }
        // Points only exist at scale 1, so the flag is moot past it.
        meta.float_seen &= self.scale(meta.interval) == 1.0;
        self.cache.store(old_id, AggregateId::of(&agg), meta);
        agg
    }

    /// Read an aggregate back from its JSON form; `null` reads as empty.
    ///
    /// Keys are plain strings, so a key only decodes as numeric when this
    /// reducer could have produced it: a finite integral point while the
    /// first scale is 1, or a finite range aligned to one of the scales.
    /// Every numeric range of one aggregate shares the current scale, so
    /// ranges narrower than the widest one, and points next to ranges, are
    /// labels too.
    pub fn decode(&self, value: &Value) -> Result<BinAggregate, String> {
        let map = match value {
            Value::Null => return Ok(BinAggregate::new()),
            Value::Object(map) => map,
            other => return Err(format!("expected an aggregate object, got {other}")),
        };
        let entries = map
            .iter()
            .map(|(text, stats)| {
                BinStats::from_value(stats)
                    .map(|s| (text, self.numeric_key(text), s))
                    .ok_or_else(|| format!("bucket '{text}' is not a statistics object"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let scale = entries
            .iter()
            .filter_map(|(_, key, _)| match key {
                Some((BucketKey::Range { .. }, i)) => Some(*i),
                _ => None,
            })
            .max();
        Ok(entries
            .into_iter()
            .map(|(text, key, stats)| {
                let key = match (key, scale) {
                    (Some((key @ BucketKey::Range { .. }, i)), Some(current)) if i == current => key,
                    (Some((key @ BucketKey::Point(_), _)), None) => key,
                    _ => BucketKey::Label(text.clone()),
                };
                (key, stats)
            })
            .collect())
    }

    /// The numeric key `text` stands for, with its interval index.
    fn numeric_key(&self, text: &str) -> Option<(BucketKey, usize)> {
        let key = BucketKey::parse_numeric(text)?;
        let interval = match key {
            BucketKey::Point(p) => {
                (p.is_finite() && p.fract() == 0.0 && self.scale(0) == 1.0).then_some(0)
            }
            BucketKey::Range { lo, hi } if lo.is_finite() && hi.is_finite() && hi > lo => {
                let width = hi - lo;
                let i = self.interval_for_width(width);
                let scale = self.scale(i);
                let steps = lo / scale;
                let aligned = (steps - steps.round()).abs() <= 1e-6;
                let exact = (scale - width).abs() <= scale * 1e-9;
                (scale.is_finite() && exact && aligned).then_some(i)
            }
            _ => None,
        }?;
        Some((key, interval))
    }

    /// Metadata as last stored for `agg`, if still cached.
    pub fn cached_meta(&self, agg: &BinAggregate) -> Option<BinMeta> {
        self.cache.get(AggregateId::of(agg))
    }

    /// Derive the metadata from the buckets alone.
    pub fn recompute_meta(&self, agg: &BinAggregate) -> BinMeta {
        let labels = agg.label_len();
        let width = agg.keys().find_map(|k| match k {
            BucketKey::Range { lo, hi } => Some(hi - lo),
            _ => None,
        });
        let interval = match width {
            Some(width) => self.interval_for_width(width),
            None => 0,
        };
        BinMeta {
            interval,
            labels,
            float_seen: width.is_some() && self.scale(interval) == 1.0,
        }
    }

    fn interval_for_width(&self, width: f64) -> usize {
        let target = width * (1.0 - 1e-9);
        let mut i = 0;
        loop {
            let scale = self.scale(i);
            if scale >= target || !scale.is_finite() {
                return i;
            }
            i += 1;
        }
    }
}

fn bucket_for(x: f64, scale: f64, float_seen: bool) -> BucketKey {
    if scale == 1.0 && !float_seen && x.fract() == 0.0 {
        return BucketKey::Point(x + 0.0);
    }
    let lo = (x / scale).floor() * scale;
    BucketKey::range(lo, lo + scale)
}

fn straddles_zero(agg: &BinAggregate) -> bool {
    let mut starts = agg.keys().filter_map(BucketKey::start);
    let Some(first) = starts.next() else {
        return false;
    };
    let negative = first < 0.0;
    starts.any(|s| (s < 0.0) != negative)
}

/// Positions `i` where `intervals[i]` is not a multiple of `intervals[i - 1]`.
pub fn non_dividing_positions(intervals: &[f64]) -> Vec<usize> {
    intervals
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1] % pair[0] != 0.0)
        .map(|(i, _)| i + 1)
        .collect()
}
