use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::mathfunc::nearest_rank;

fn as_micros<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_micros() as u64)
}

fn percent(n: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        n as f64 * 100.0 / total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoolReport {
    pub n: u64,
    pub true_n: u64,
    pub true_percent: f64,
    pub false_n: u64,
    pub false_percent: f64,
}

impl BoolReport {
    pub fn analyze(values: &[bool]) -> Self {
        let n = values.len() as u64;
        let true_n = values.iter().filter(|v| **v).count() as u64;
        let false_n = n - true_n;

        Self {
            n,
            true_n,
            true_percent: percent(true_n, n),
            false_n,
            false_percent: percent(false_n, n),
        }
    }
}

/// Count, mean and nearest-rank percentiles of a set of durations.
/// Durations serialize as whole microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationReport {
    pub n: u64,
    #[serde(serialize_with = "as_micros")]
    pub mean: Duration,
    #[serde(serialize_with = "as_micros")]
    pub p05: Duration,
    #[serde(serialize_with = "as_micros")]
    pub p50: Duration,
    #[serde(serialize_with = "as_micros")]
    pub p95: Duration,
}

impl DurationReport {
    pub fn analyze(times: &[Duration]) -> Self {
        if times.is_empty() {
            return Self::default();
        }

        let mut sorted = times.to_vec();
        sorted.sort_unstable();

        let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
        let mean_nanos = total / sorted.len() as u128;

        Self {
            n: sorted.len() as u64,
            mean: Duration::from_nanos(mean_nanos as u64),
            p05: nearest_rank(&sorted, 5).unwrap_or_default(),
            p50: nearest_rank(&sorted, 50).unwrap_or_default(),
            p95: nearest_rank(&sorted, 95).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NominalItem {
    pub name: String,
    pub n: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NominalReport {
    pub items: Vec<NominalItem>,
}

/// Position of one class inside an ordered distribution: its own share, the
/// running total from the lowest class up (`cumulative`) and from this class
/// to the highest (`down_cumulative`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Distribution {
    pub n: u64,
    pub percent: f64,
    pub cumulative_n: u64,
    pub cumulative_percent: f64,
    pub down_cumulative_n: u64,
    pub down_cumulative_percent: f64,
}

impl Distribution {
    /// Build the distribution rows for `counts`, given in ascending order.
    pub fn from_counts(counts: &[u64]) -> Vec<Self> {
        let total: u64 = counts.iter().sum();
        let mut up = 0u64;
        let mut down = total;

        counts
            .iter()
            .map(|&n| {
                up += n;
                let row = Self {
                    n,
                    percent: percent(n, total),
                    cumulative_n: up,
                    cumulative_percent: percent(up, total),
                    down_cumulative_n: down,
                    down_cumulative_percent: percent(down, total),
                };
                down -= n;
                row
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrdinalRankReport {
    pub name: String,
    pub order: usize,
    #[serde(flatten)]
    pub dist: Distribution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrdinalReport {
    pub ranks: Vec<OrdinalRankReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalItem {
    /// Lower edge of the bucket.
    pub value: f64,
    /// Bucket index counted from the smallest sample.
    pub step: i64,
    #[serde(flatten)]
    pub dist: Distribution,
    pub mean: f64,
    pub standard_deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalReport {
    pub interval: f64,
    pub items: Vec<IntervalItem>,
    pub mean: f64,
    pub standard_deviation: f64,
}

impl Default for IntervalReport {
    fn default() -> Self {
        Self {
            interval: 1.0,
            items: Vec::new(),
            mean: 0.0,
            standard_deviation: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatioReport {
    pub n: u64,
    pub mean: f64,
    pub geometric_mean: f64,
    pub quadratic_mean: f64,
    pub harmonic_mean: f64,
    pub standard_deviation: f64,
    pub p05: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Snapshot of a stat tree. Maps are ordered so rendering is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatReport {
    pub bools: BTreeMap<String, BoolReport>,
    pub durations: BTreeMap<String, DurationReport>,
    pub subs: BTreeMap<String, StatReport>,
    pub nominals: BTreeMap<String, NominalReport>,
    pub ordinals: BTreeMap<String, OrdinalReport>,
    pub intervals: BTreeMap<String, IntervalReport>,
    pub ratios: BTreeMap<String, RatioReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultCounts {
    pub ok: u64,
    pub connect_fail: u64,
    pub response_broken: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// All attempts.
    pub time: DurationReport,
    /// Attempts that reached `Responsed` and ended `Ok`.
    pub ok_time: DurationReport,
    pub results: ResultCounts,
    /// Earliest attempt start to latest attempt end.
    #[serde(serialize_with = "as_micros")]
    pub span: Duration,
    pub stat: StatReport,
}

const INDENT: &str = "    ";

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Time:    {}", self.time)?;
        writeln!(f, "OKsTime: {}", self.ok_time)?;
        writeln!(
            f,
            "Results: ok {},  connect_fail {},  response_broken {},  span {:?}",
            self.results.ok, self.results.connect_fail, self.results.response_broken, self.span
        )?;
        writeln!(f, "Stat >>>")?;
        write!(f, "{}", self.stat)
    }
}

impl fmt::Display for StatReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{INDENT}{line}")?;
        }
        Ok(())
    }
}

impl StatReport {
    fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, b) in &self.bools {
            out.push(format!("{name} \t{b}"));
        }
        for (name, d) in &self.durations {
            out.push(format!("{name} \t{d}"));
        }

        let mut nested = |name: &str, lines: Vec<String>| {
            out.push(format!("{name} >>>"));
            out.extend(lines.into_iter().map(|l| format!("{INDENT}{l}")));
        };

        for (name, sub) in &self.subs {
            nested(name, sub.lines());
        }
        for (name, v) in &self.nominals {
            nested(name, v.lines());
        }
        for (name, v) in &self.ordinals {
            nested(name, v.lines());
        }
        for (name, v) in &self.intervals {
            nested(name, v.lines());
        }
        for (name, v) in &self.ratios {
            nested(name, v.lines());
        }

        out
    }
}

impl fmt::Display for BoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n {:7},  true {:7}({:.2}%),  false {:7}({:.2}%)",
            self.n, self.true_n, self.true_percent, self.false_n, self.false_percent
        )
    }
}

impl fmt::Display for DurationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n {:7},  avg {:?},  5% {:?},  50% {:?},  95% {:?}",
            self.n, self.mean, self.p05, self.p50, self.p95
        )
    }
}

impl NominalReport {
    fn lines(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|i| format!("{:>30} : n {:7}({:6.2}%)", i.name, i.n, i.percent))
            .collect()
    }
}

impl Distribution {
    fn line(&self) -> String {
        format!(
            "n {:7}({:6.2}%), c {:7}({:6.2}%), d {:7}({:6.2}%)",
            self.n,
            self.percent,
            self.cumulative_n,
            self.cumulative_percent,
            self.down_cumulative_n,
            self.down_cumulative_percent
        )
    }
}

impl OrdinalReport {
    fn lines(&self) -> Vec<String> {
        self.ranks
            .iter()
            .flat_map(|r| {
                [
                    format!("{:>10} : ord({:2})", r.name, r.order),
                    format!("{:12} {}", "", r.dist.line()),
                ]
            })
            .collect()
    }
}

impl IntervalReport {
    fn lines(&self) -> Vec<String> {
        let mut out = vec![format!(
            "interval: {:15.6}, avg: {:15.6}, sd: {:15.6}",
            self.interval, self.mean, self.standard_deviation
        )];
        for item in &self.items {
            out.push(format!(
                "step: {:<15.6}({})  avg {:.6}, sd {:.6}",
                item.value, item.step, item.mean, item.standard_deviation
            ));
            out.push(format!("   {}", item.dist.line()));
        }
        out
    }
}

impl RatioReport {
    fn lines(&self) -> Vec<String> {
        vec![
            format!(
                "count: {:13},  avg: {:15.6},  SD: {:16.6}",
                self.n, self.mean, self.standard_deviation
            ),
            format!(
                "G: {:17.6},  Q: {:17.6},  H: {:17.6}",
                self.geometric_mean, self.quadratic_mean, self.harmonic_mean
            ),
            format!(
                "P05: {:15.6},  P25: {:15.6},  P50: {:15.6}",
                self.p05, self.p25, self.p50
            ),
            format!("P75: {:15.6},  P95: {:15.6}", self.p75, self.p95),
        ]
    }
}
