//! Multi-scale statistics tree.
//!
//! Samples are appended raw; every reduction happens in [`Stat::report`].
//! Trees collected by different workers are merged with [`Stat::combine`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::interval::{bucket_index, calc_interval, divides};
use crate::mathfunc::{
    geometric_mean, harmonic_mean, mean, nearest_rank, quadratic_mean, standard_deviation,
};
use crate::report::{
    BoolReport, Distribution, DurationReport, IntervalItem, IntervalReport, NominalItem,
    NominalReport, OrdinalRankReport, OrdinalReport, RatioReport, StatReport,
};

static NEXT_UNIVERSE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct RankUniverse {
    id: u64,
    names: Vec<String>,
}

impl RankUniverse {
    fn order_of(&self, rank: &str) -> Option<usize> {
        self.names.iter().position(|n| n == rank)
    }
}

/// A fixed, totally ordered set of named ranks (e.g. a Likert scale).
///
/// Clones share the same universe id, so ranks produced by clones handed to
/// different workers still merge.
#[derive(Debug, Clone)]
pub struct OrdinalGen {
    universe: Arc<RankUniverse>,
}

impl OrdinalGen {
    /// Ranks are ordered as given, lowest first.
    pub fn new<I, S>(ranks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for rank in ranks {
            let rank = rank.into();
            if !names.contains(&rank) {
                names.push(rank);
            }
        }

        Self {
            universe: Arc::new(RankUniverse {
                id: NEXT_UNIVERSE_ID.fetch_add(1, Ordering::Relaxed),
                names,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.universe.id
    }

    /// The rank called `rank`, if this universe has one.
    pub fn ord(&self, rank: &str) -> Option<OrdinalRank> {
        self.universe.order_of(rank).map(|order| OrdinalRank {
            universe: Arc::clone(&self.universe),
            order,
        })
    }

    pub fn ranks(&self) -> Vec<OrdinalRank> {
        (0..self.universe.names.len())
            .map(|order| OrdinalRank {
                universe: Arc::clone(&self.universe),
                order,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OrdinalRank {
    universe: Arc<RankUniverse>,
    order: usize,
}

impl OrdinalRank {
    pub fn name(&self) -> &str {
        &self.universe.names[self.order]
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn universe_id(&self) -> u64 {
        self.universe.id
    }

    /// Whether both ranks come from the same universe.
    pub fn related(&self, other: &OrdinalRank) -> bool {
        self.universe.id == other.universe.id
    }
}

#[derive(Debug, Clone, Default)]
struct NominalStat {
    items: BTreeMap<String, u64>,
}

impl NominalStat {
    fn item(&mut self, item: &str) {
        *self.items.entry(item.to_string()).or_insert(0) += 1;
    }

    fn init<S: AsRef<str>>(&mut self, items: &[S]) {
        for item in items {
            self.items.entry(item.as_ref().to_string()).or_insert(0);
        }
    }

    fn combine(&mut self, other: NominalStat) {
        for (name, n) in other.items {
            *self.items.entry(name).or_insert(0) += n;
        }
    }

    fn report(&self) -> NominalReport {
        let total: u64 = self.items.values().sum();
        let items = self
            .items
            .iter()
            .map(|(name, &n)| NominalItem {
                name: name.clone(),
                n,
                percent: if total == 0 {
                    0.0
                } else {
                    n as f64 * 100.0 / total as f64
                },
            })
            .collect();

        NominalReport { items }
    }
}

#[derive(Debug, Clone)]
struct OrdinalStat {
    universe: Arc<RankUniverse>,
    counts: Vec<u64>,
}

impl OrdinalStat {
    fn new(rank: &OrdinalRank) -> Self {
        Self {
            universe: Arc::clone(&rank.universe),
            counts: vec![0; rank.universe.names.len()],
        }
    }

    fn rank(&mut self, rank: &OrdinalRank) -> bool {
        if rank.universe.id != self.universe.id {
            return false;
        }

        self.counts[rank.order] += 1;
        true
    }

    fn combine(&mut self, other: OrdinalStat) -> bool {
        if other.universe.id != self.universe.id {
            return false;
        }

        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
        true
    }

    fn report(&self) -> OrdinalReport {
        if self.counts.iter().sum::<u64>() == 0 {
            return OrdinalReport::default();
        }

        let ranks = Distribution::from_counts(&self.counts)
            .into_iter()
            .enumerate()
            .map(|(order, dist)| OrdinalRankReport {
                name: self.universe.names[order].clone(),
                order,
                dist,
            })
            .collect();

        OrdinalReport { ranks }
    }
}

#[derive(Debug, Clone, Default)]
struct IntervalStat {
    values: Vec<f64>,
    interval: Option<f64>,
}

impl IntervalStat {
    fn combine(&mut self, other: IntervalStat) {
        self.values.extend(other.values);
        if self.interval.is_none() {
            self.interval = other.interval;
        }
    }

    fn report(&self, name: &str) -> IntervalReport {
        if self.values.is_empty() {
            return IntervalReport {
                interval: self.interval.unwrap_or(1.0),
                ..IntervalReport::default()
            };
        }

        let (detected, min) = calc_interval(&self.values);
        let interval = match self.interval {
            Some(set) => {
                if !divides(detected, set) {
                    warn!(
                        "interval '{}': set width {} does not divide detected width {}",
                        name, set, detected
                    );
                }
                set
            }
            None => detected,
        };

        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for &v in &self.values {
            buckets
                .entry(bucket_index(v, min, interval))
                .or_default()
                .push(v);
        }

        let counts: Vec<u64> = buckets.values().map(|b| b.len() as u64).collect();
        let items = buckets
            .iter()
            .zip(Distribution::from_counts(&counts))
            .map(|((&step, values), dist)| IntervalItem {
                value: min + interval * step as f64,
                step,
                dist,
                mean: mean(values),
                standard_deviation: standard_deviation(values),
            })
            .collect();

        IntervalReport {
            interval,
            items,
            mean: mean(&self.values),
            standard_deviation: standard_deviation(&self.values),
        }
    }
}

fn ratio_report(values: &[f64]) -> RatioReport {
    if values.is_empty() {
        return RatioReport::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pct = |p| nearest_rank(&sorted, p).unwrap_or_default();

    RatioReport {
        n: values.len() as u64,
        mean: mean(values),
        geometric_mean: geometric_mean(values),
        quadratic_mean: quadratic_mean(values),
        harmonic_mean: harmonic_mean(values),
        standard_deviation: standard_deviation(values),
        p05: pct(5),
        p25: pct(25),
        p50: pct(50),
        p75: pct(75),
        p95: pct(95),
    }
}

/// Named accumulators for the four scales of measure plus booleans and
/// durations, with arbitrarily nested sub-trees.
#[derive(Debug, Clone, Default)]
pub struct Stat {
    bools: HashMap<String, Vec<bool>>,
    durations: HashMap<String, Vec<Duration>>,
    subs: HashMap<String, Stat>,
    nominals: HashMap<String, NominalStat>,
    ordinals: HashMap<String, OrdinalStat>,
    intervals: HashMap<String, IntervalStat>,
    ratios: HashMap<String, Vec<f64>>,
}

impl Stat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bool(&mut self, name: &str, value: bool) {
        self.bools.entry(name.to_string()).or_default().push(value);
    }

    pub fn duration(&mut self, name: &str, duration: Duration) {
        self.durations
            .entry(name.to_string())
            .or_default()
            .push(duration);
    }

    /// The sub-tree called `name`, created on first use.
    pub fn sub(&mut self, name: &str) -> &mut Stat {
        self.subs.entry(name.to_string()).or_default()
    }

    /// Walk a dotted path (`"api.login"`) of sub-trees, creating missing ones.
    pub fn path(&mut self, dotted: &str) -> &mut Stat {
        dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .fold(self, |stat, name| stat.sub(name))
    }

    /// Count one observation of the unordered category `item`.
    pub fn nominal(&mut self, name: &str, item: &str) {
        self.nominals.entry(name.to_string()).or_default().item(item);
    }

    /// Pre-seed categories so they are reported even with zero observations.
    pub fn nominal_init<S: AsRef<str>>(&mut self, name: &str, items: &[S]) {
        self.nominals.entry(name.to_string()).or_default().init(items);
    }

    /// Count one observation of `rank`. The first rank recorded under `name`
    /// fixes the universe; ranks from any other universe are dropped.
    pub fn ordinal(&mut self, name: &str, rank: &OrdinalRank) {
        let stat = self
            .ordinals
            .entry(name.to_string())
            .or_insert_with(|| OrdinalStat::new(rank));

        if !stat.rank(rank) {
            warn!(
                "ordinal '{}': rank '{}' belongs to universe {}, expected {}",
                name,
                rank.name(),
                rank.universe_id(),
                stat.universe.id
            );
        }
    }

    pub fn interval(&mut self, name: &str, value: f64) {
        self.intervals
            .entry(name.to_string())
            .or_default()
            .values
            .push(value);
    }

    /// Fix the bucket width instead of inferring it.
    pub fn interval_init(&mut self, name: &str, interval: f64) {
        self.intervals.entry(name.to_string()).or_default().interval = Some(interval);
    }

    pub fn ratio(&mut self, name: &str, value: f64) {
        self.ratios.entry(name.to_string()).or_default().push(value);
    }

    pub fn is_empty(&self) -> bool {
        self.bools.is_empty()
            && self.durations.is_empty()
            && self.subs.is_empty()
            && self.nominals.is_empty()
            && self.ordinals.is_empty()
            && self.intervals.is_empty()
            && self.ratios.is_empty()
    }

    /// Merge `other` into this tree. Returns how many ordinal metrics were
    /// skipped because their rank universes differ.
    pub fn combine(&mut self, other: Stat) -> usize {
        for (name, values) in other.bools {
            self.bools.entry(name).or_default().extend(values);
        }

        for (name, values) in other.durations {
            self.durations.entry(name).or_default().extend(values);
        }

        let mut skipped = 0;
        for (name, sub) in other.subs {
            match self.subs.get_mut(&name) {
                Some(mine) => skipped += mine.combine(sub),
                None => {
                    self.subs.insert(name, sub);
                }
            }
        }

        for (name, nominal) in other.nominals {
            self.nominals.entry(name).or_default().combine(nominal);
        }

        for (name, ordinal) in other.ordinals {
            match self.ordinals.get_mut(&name) {
                Some(mine) => {
                    if !mine.combine(ordinal) {
                        skipped += 1;
                    }
                }
                None => {
                    self.ordinals.insert(name, ordinal);
                }
            }
        }

        for (name, interval) in other.intervals {
            self.intervals.entry(name).or_default().combine(interval);
        }

        for (name, values) in other.ratios {
            self.ratios.entry(name).or_default().extend(values);
        }

        skipped
    }

    pub fn report(&self) -> StatReport {
        StatReport {
            bools: collect(&self.bools, |v| BoolReport::analyze(v)),
            durations: collect(&self.durations, |v| DurationReport::analyze(v)),
            subs: collect(&self.subs, Stat::report),
            nominals: collect(&self.nominals, NominalStat::report),
            ordinals: collect(&self.ordinals, OrdinalStat::report),
            intervals: self
                .intervals
                .iter()
                .map(|(name, v)| (name.clone(), v.report(name)))
                .collect(),
            ratios: collect(&self.ratios, |v| ratio_report(v)),
        }
    }
}

fn collect<V, R>(map: &HashMap<String, V>, f: impl Fn(&V) -> R) -> BTreeMap<String, R> {
    map.iter().map(|(name, v)| (name.clone(), f(v))).collect()
}
