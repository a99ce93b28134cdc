//! Streaming per-column descriptive statistics.
//!
//! Each column gets a [`StatSet`] bound to its level of measurement:
//! numeric columns accumulate online moments, P² quantile estimates and a
//! primed histogram; ordinal and nominal columns accumulate value counts.
//! Memory is constant per column for the numeric machinery; the distinct
//! counter is exact, with `uvalues` reporting the top 100.

use std::collections::{BTreeMap, HashMap};

use log::warn;

use crate::err::MprError;
use crate::mpr_meta::StatsEntry;
use crate::mpr_reader::MprReader;
use crate::mpr_value::Value;

/// Values collected before histogram bins are fixed.
const BIN_PRIMER_COUNT: u64 = 5000;

/// Histogram bin count.
const NUM_BINS: usize = 16;

/// How many of the most common values `uvalues` reports.
const TOP_UVALUES: usize = 100;

/// Target sample size for strided stats runs.
const SAMPLE_ROWS: u64 = 10_000;

/// Level of measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lom {
    /// Categorical, usually strings.
    Nominal,
    /// Counts or ranks; subtraction undefined. Times and dates.
    Ordinal,
    /// Numbers with subtraction but no meaningful zero.
    Interval,
    /// Numbers with a meaningful zero.
    Ratio,
}

impl Lom {
    /// Single-letter wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Lom::Nominal => "n",
            Lom::Ordinal => "o",
            Lom::Interval => "i",
            Lom::Ratio => "r",
        }
    }
}

/// Renders bin counts as a bar chart using an 8-step unicode ramp, or an
/// ASCII ramp as fallback.
pub fn text_hist(bins: &[u64], ascii: bool) -> String {
    let parts: Vec<char> = if ascii {
        " _.,,-=T#".chars().collect()
    } else {
        " ▁▂▃▄▅▆▇▉".chars().collect()
    };
    let max = bins.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return String::new();
    }
    let fraction = max as f64 / (parts.len() - 1) as f64;
    bins.iter()
        .map(|&x| parts[(x as f64 / fraction).round() as usize])
        .collect()
}

// ── Online moments ─────────────────────────────────────────────────

/// Numerically stable running moments: count, mean, variance, skewness,
/// kurtosis, min, max.
#[derive(Clone, Debug, Default)]
struct OnlineMoments {
    n: u64,
    mean: f64,
    m2: f64,
    m3: f64,
    m4: f64,
    min: f64,
    max: f64,
}

impl OnlineMoments {
    fn add(&mut self, x: f64) {
        if self.n == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }

        let n1 = self.n as f64;
        self.n += 1;
        let n = self.n as f64;

        let delta = x - self.mean;
        let delta_n = delta / n;
        let delta_n2 = delta_n * delta_n;
        let term1 = delta * delta_n * n1;

        self.mean += delta_n;
        self.m4 += term1 * delta_n2 * (n * n - 3.0 * n + 3.0) + 6.0 * delta_n2 * self.m2
            - 4.0 * delta_n * self.m3;
        self.m3 += term1 * delta_n * (n - 2.0) - 3.0 * delta_n * self.m2;
        self.m2 += term1;
    }

    fn variance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2 / (self.n as f64 - 1.0)
        }
    }

    fn skewness(&self) -> f64 {
        if self.n < 2 || self.m2 == 0.0 {
            0.0
        } else {
            (self.n as f64).sqrt() * self.m3 / self.m2.powf(1.5)
        }
    }

    fn kurtosis(&self) -> f64 {
        if self.n < 2 || self.m2 == 0.0 {
            0.0
        } else {
            self.n as f64 * self.m4 / (self.m2 * self.m2) - 3.0
        }
    }
}

// ── P² quantile estimation ─────────────────────────────────────────

/// Jain–Chlamtac P² streaming quantile estimator: five markers tracking a
/// single quantile in constant memory.
#[derive(Clone, Debug)]
struct P2Quantile {
    p: f64,
    q: [f64; 5],
    n: [f64; 5],
    np: [f64; 5],
    dn: [f64; 5],
    count: u64,
    init: Vec<f64>,
}

impl P2Quantile {
    fn new(p: f64) -> Self {
        Self {
            p,
            q: [0.0; 5],
            n: [0.0; 5],
            np: [0.0; 5],
            dn: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            count: 0,
            init: Vec::with_capacity(5),
        }
    }

    fn add(&mut self, x: f64) {
        self.count += 1;

        if self.count <= 5 {
            self.init.push(x);
            if self.count == 5 {
                self.init.sort_by(f64::total_cmp);
                for i in 0..5 {
                    self.q[i] = self.init[i];
                    self.n[i] = (i + 1) as f64;
                }
                self.np = [
                    1.0,
                    1.0 + 2.0 * self.p,
                    1.0 + 4.0 * self.p,
                    3.0 + 2.0 * self.p,
                    5.0,
                ];
            }
            return;
        }

        // Locate the cell and bump extreme markers.
        let k = if x < self.q[0] {
            self.q[0] = x;
            0
        } else if x < self.q[1] {
            0
        } else if x < self.q[2] {
            1
        } else if x < self.q[3] {
            2
        } else if x <= self.q[4] {
            3
        } else {
            self.q[4] = x;
            3
        };

        for i in (k + 1)..5 {
            self.n[i] += 1.0;
        }
        for i in 0..5 {
            self.np[i] += self.dn[i];
        }

        // Adjust interior markers toward their desired positions.
        for i in 1..4 {
            let d = self.np[i] - self.n[i];
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1.0)
                || (d <= -1.0 && self.n[i - 1] - self.n[i] < -1.0)
            {
                let d = d.signum();
                let parabolic = self.q[i]
                    + d / (self.n[i + 1] - self.n[i - 1])
                        * ((self.n[i] - self.n[i - 1] + d) * (self.q[i + 1] - self.q[i])
                            / (self.n[i + 1] - self.n[i])
                            + (self.n[i + 1] - self.n[i] - d) * (self.q[i] - self.q[i - 1])
                                / (self.n[i] - self.n[i - 1]));

                if self.q[i - 1] < parabolic && parabolic < self.q[i + 1] {
                    self.q[i] = parabolic;
                } else {
                    let j = if d > 0.0 { i + 1 } else { i - 1 };
                    self.q[i] += d * (self.q[j] - self.q[i]) / (self.n[j] - self.n[i]);
                }
                self.n[i] += d;
            }
        }
    }

    fn value(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if self.count < 5 {
            let mut sorted = self.init.clone();
            sorted.sort_by(f64::total_cmp);
            let idx = ((sorted.len() - 1) as f64 * self.p).round() as usize;
            return Some(sorted[idx]);
        }
        Some(self.q[2])
    }

    fn reset(&mut self) {
        *self = Self::new(self.p);
    }
}

// ── StatSet ────────────────────────────────────────────────────────

/// Streaming statistics for one column.
#[derive(Clone, Debug)]
pub struct StatSet {
    name: String,
    lom: Lom,
    flags: String,
    n: u64,
    size: Option<u32>,
    counts: HashMap<String, u64>,
    moments: OnlineMoments,
    quantiles: [P2Quantile; 3],
    bin_min: Option<f64>,
    bin_max: Option<f64>,
    bin_width: Option<f64>,
    bins: Vec<u64>,
}

impl StatSet {
    /// Binds a stat set to a column name and its resolved type.
    pub fn new(name: &str, typ: &str) -> Self {
        let is_gvid = name.contains("gvid");
        let is_year = name.contains("year");
        let is_time = typ == "time";
        let is_date = typ == "date" || typ == "datetime";

        let lom = if is_year || is_time || is_date {
            Lom::Ordinal
        } else if typ == "int" || typ == "float" {
            Lom::Interval
        } else {
            Lom::Nominal
        };

        let mut flags = String::with_capacity(4);
        flags.push(if is_gvid { 'G' } else { ' ' });
        flags.push(if is_year { 'Y' } else { ' ' });
        flags.push(if is_time { 'T' } else { ' ' });
        flags.push(if is_date { 'D' } else { ' ' });

        Self {
            name: name.to_string(),
            lom,
            flags,
            n: 0,
            size: None,
            counts: HashMap::new(),
            moments: OnlineMoments::default(),
            quantiles: [
                P2Quantile::new(0.25),
                P2Quantile::new(0.5),
                P2Quantile::new(0.75),
            ],
            bin_min: None,
            bin_max: None,
            bin_width: None,
            bins: vec![0; NUM_BINS],
        }
    }

    /// Column name this set is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current level of measurement.
    pub fn lom(&self) -> Lom {
        self.lom
    }

    /// True for interval/ratio columns.
    pub fn is_numeric(&self) -> bool {
        self.lom == Lom::Interval || self.lom == Lom::Ratio
    }

    /// Values observed.
    pub fn count(&self) -> u64 {
        self.n
    }

    /// Distinct values observed.
    pub fn nuniques(&self) -> u64 {
        self.counts.len() as u64
    }

    /// Feeds one value.
    pub fn add(&mut self, v: &Value) {
        self.n += 1;

        let text = v.to_string();
        self.size = Some(self.size.unwrap_or(0).max(text.chars().count() as u32));

        if !self.is_numeric() {
            *self.counts.entry(text).or_insert(0) += 1;
            return;
        }

        if self.n < BIN_PRIMER_COUNT {
            *self.counts.entry(text.clone()).or_insert(0) += 1;
        } else if self.n == BIN_PRIMER_COUNT {
            if self.nuniques() < BIN_PRIMER_COUNT / 100 {
                // Nearly all duplicates: this "number" ranks rather than
                // measures. Numeric machinery is discarded.
                self.lom = Lom::Ordinal;
                self.moments = OnlineMoments::default();
                for q in &mut self.quantiles {
                    q.reset();
                }
                self.bins = vec![0; NUM_BINS];
                self.counts.clear();
                *self.counts.entry(text).or_insert(0) += 1;
                return;
            }
            self.prime_bins();
            self.counts.clear();
        } else if let (Some(min), Some(max), Some(width)) =
            (self.bin_min, self.bin_max, self.bin_width)
        {
            let f = force_float(v);
            if f >= min && f <= max {
                let bin = (((f - min) / width) as usize).min(NUM_BINS - 1);
                self.bins[bin] += 1;
            }
        }

        match v.as_f64() {
            Some(f) => {
                self.moments.add(f);
                for q in &mut self.quantiles {
                    q.add(f);
                }
            }
            None => {
                // Unparseable values on a numeric column raise the
                // cardinality counter instead of erroring.
                *self.counts.entry(text).or_insert(0) += 1;
            }
        }
    }

    /// Fixes bin edges at mean ± 2σ and reclassifies the primer.
    fn prime_bins(&mut self) {
        let sigma = self.moments.variance().sqrt();
        let min = self.moments.mean - 2.0 * sigma;
        let max = self.moments.mean + 2.0 * sigma;
        let width = (max - min) / NUM_BINS as f64;
        if width <= 0.0 || !width.is_finite() {
            return;
        }
        self.bin_min = Some(min);
        self.bin_max = Some(max);
        self.bin_width = Some(width);

        for (text, count) in &self.counts {
            let f: f64 = match text.trim().parse() {
                Ok(f) => f,
                Err(_) => continue,
            };
            if f >= min && f <= max {
                let bin = (((f - min) / width) as usize).min(NUM_BINS - 1);
                self.bins[bin] += count;
            }
        }
    }

    /// Mean, for numeric columns.
    pub fn mean(&self) -> Option<f64> {
        self.is_numeric().then_some(self.moments.mean)
    }

    /// Standard deviation, for numeric columns.
    pub fn stddev(&self) -> Option<f64> {
        self.is_numeric().then(|| self.moments.variance().sqrt())
    }

    /// Minimum, for numeric columns.
    pub fn min(&self) -> Option<f64> {
        (self.is_numeric() && self.moments.n > 0).then_some(self.moments.min)
    }

    /// Maximum, for numeric columns.
    pub fn max(&self) -> Option<f64> {
        (self.is_numeric() && self.moments.n > 0).then_some(self.moments.max)
    }

    /// 25th percentile estimate.
    pub fn p25(&self) -> Option<f64> {
        self.quantile(0)
    }

    /// Median estimate.
    pub fn p50(&self) -> Option<f64> {
        self.quantile(1)
    }

    /// 75th percentile estimate.
    pub fn p75(&self) -> Option<f64> {
        self.quantile(2)
    }

    fn quantile(&self, i: usize) -> Option<f64> {
        if self.is_numeric() {
            self.quantiles[i].value()
        } else {
            None
        }
    }

    /// Skewness, for numeric columns.
    pub fn skewness(&self) -> Option<f64> {
        self.is_numeric().then(|| self.moments.skewness())
    }

    /// Excess kurtosis, for numeric columns.
    pub fn kurtosis(&self) -> Option<f64> {
        self.is_numeric().then(|| self.moments.kurtosis())
    }

    /// Histogram bin counts.
    pub fn hist(&self) -> &[u64] {
        &self.bins
    }

    /// The top 100 most common values with counts.
    pub fn uvalues(&self) -> BTreeMap<String, u64> {
        let mut pairs: Vec<(&String, &u64)> = self.counts.iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        pairs
            .into_iter()
            .take(TOP_UVALUES)
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Snapshot of this set as a meta `stats` entry.
    pub fn to_entry(&self) -> StatsEntry {
        StatsEntry {
            lom: Some(self.lom.code().to_string()),
            flags: Some(self.flags.clone()),
            count: self.n,
            nuniques: self.nuniques(),
            mean: self.mean(),
            std: self.stddev(),
            min: self.min(),
            p25: self.p25(),
            p50: self.p50(),
            p75: self.p75(),
            max: self.max(),
            skewness: self.skewness(),
            kurtosis: self.kurtosis(),
            hist: self.bins.clone(),
            text_hist: text_hist(&self.bins, false),
            uvalues: self.uvalues(),
        }
    }
}

fn force_float(v: &Value) -> f64 {
    match v.as_f64() {
        Some(f) => f,
        None => {
            warn!("failed to convert {v} to float; using 0 instead");
            0.0
        }
    }
}

// ── Stats runner ───────────────────────────────────────────────────

/// Runs one [`StatSet`] per column over a reader's data rows.
pub struct Stats {
    sets: Vec<(String, StatSet)>,
}

impl Stats {
    /// Builds stat sets from `(column name, resolved type)` pairs.
    pub fn new(schema: &[(String, String)]) -> Self {
        let sets = schema
            .iter()
            .map(|(name, typ)| (name.clone(), StatSet::new(name, typ)))
            .collect();
        Self { sets }
    }

    /// Scans the reader's data rows. With `sample_from` set, processes a
    /// deterministic stride of roughly [`SAMPLE_ROWS`] rows.
    pub fn run(mut self, reader: &MprReader, sample_from: Option<u64>) -> Result<Self, MprError> {
        let stride = sample_from.map(|total| total / SAMPLE_ROWS).unwrap_or(0);

        for (i, proxy) in reader.proxied()?.enumerate() {
            let proxy = proxy?;
            if stride > 4 && (i as u64) % stride != 0 {
                continue;
            }
            for (name, set) in &mut self.sets {
                let value = proxy.get(name).cloned().unwrap_or(Value::Null);
                set.add(&value);
            }
        }
        Ok(self)
    }

    /// The stat sets in schema order.
    pub fn sets(&self) -> impl Iterator<Item = (&String, &StatSet)> {
        self.sets.iter().map(|(name, set)| (name, set))
    }

    /// Looks up a stat set by column name.
    pub fn get(&self, name: &str) -> Option<&StatSet> {
        self.sets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, set)| set)
    }
}
