use serde::Serialize;
use std::time::{Duration, Instant};

use crate::report::{DurationReport, Report, ResultCounts};
use crate::stats::Stat;

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneResult {
    Ok,
    /// No byte of the request could be sent.
    ConnectFail,
    /// The request went out but no well-formed response came back.
    ResponseBroken,
}

/// Progress of the attempt in flight. Steps only move forward, one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DroneStep {
    Init,
    Connected,
    Responsed,
}

#[derive(Debug)]
struct InFlight {
    step: DroneStep,
    start: Instant,
    connected: Option<Instant>,
    responded: Option<Instant>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            step: DroneStep::Init,
            start: Instant::now(),
            connected: None,
            responded: None,
        }
    }

    fn end(self, result: DroneResult) -> Attempt {
        let end = self
            .responded
            .or(self.connected)
            .unwrap_or_else(Instant::now);

        Attempt {
            step: self.step,
            start: self.start,
            connected: self.connected,
            responded: self.responded,
            end,
            result,
        }
    }
}

/// One finished, timed execution of a drone.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub step: DroneStep,
    pub start: Instant,
    pub connected: Option<Instant>,
    pub responded: Option<Instant>,
    /// Latest of responded / connected, or the moment `end` was called.
    pub end: Instant,
    pub result: DroneResult,
}

impl Attempt {
    pub fn elapsed(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    pub fn is_ok(&self) -> bool {
        self.step == DroneStep::Responsed && self.result == DroneResult::Ok
    }
}

/// Per-worker run tracker: the attempt in flight, finished attempts, the stop
/// condition and the worker's statistics tree.
#[derive(Debug, Default)]
pub struct Context {
    current: Option<InFlight>,
    history: Vec<Attempt>,
    /// Attempts left; `None` means unlimited.
    count: Option<u64>,
    deadline: Option<Instant>,
    stat: Stat,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow at most `count` more attempts.
    pub fn set_count(&mut self, count: u64) {
        self.count = Some(count);
        self.history.reserve(count.min(1 << 16) as usize);
    }

    /// Refuse new attempts once `d` has elapsed from now.
    pub fn set_time(&mut self, d: Duration) {
        self.deadline = Some(Instant::now() + d);
    }

    /// Open a new attempt. Returns false, without opening one, when the budget
    /// is spent or the deadline has passed; after the deadline every further
    /// call is refused too.
    pub fn start(&mut self) -> bool {
        if self.current.is_some() {
            panic!("start() while an attempt is still in flight");
        }

        if self.count != Some(0) {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.count = Some(0);
                    self.deadline = None;
                }
            }
        }

        match self.count {
            Some(0) => return false,
            Some(n) => self.count = Some(n - 1),
            None => {}
        }

        self.current = Some(InFlight::new());
        true
    }

    /// Advance the attempt in flight. Panics on any transition other than
    /// Init -> Connected -> Responsed, or without a started attempt.
    pub fn step(&mut self, step: DroneStep) {
        let Some(cur) = self.current.as_mut() else {
            panic!("step({:?}) without start()", step);
        };

        match (cur.step, step) {
            (DroneStep::Init, DroneStep::Connected) => cur.connected = Some(Instant::now()),
            (DroneStep::Connected, DroneStep::Responsed) => cur.responded = Some(Instant::now()),
            (from, to) => panic!("invalid step {:?} -> {:?}", from, to),
        }
        cur.step = step;
    }

    /// Close the attempt in flight and append it to the history.
    pub fn end(&mut self, result: DroneResult) {
        let Some(cur) = self.current.take() else {
            panic!("end({:?}) without start()", result);
        };

        self.history.push(cur.end(result));
    }

    pub fn history(&self) -> &[Attempt] {
        &self.history
    }

    /// Attempts still allowed, `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        self.count
    }

    pub fn bool(&mut self, name: &str, value: bool) {
        self.stat.bool(name, value);
    }

    pub fn duration(&mut self, name: &str, duration: Duration) {
        self.stat.duration(name, duration);
    }

    pub fn sub_stat(&mut self, name: &str) -> &mut Stat {
        self.stat.sub(name)
    }

    pub fn stat(&mut self) -> &mut Stat {
        &mut self.stat
    }

    /// Fold other workers' contexts into this one. Returns the number of
    /// ordinal metrics that could not be merged.
    pub fn combine<I>(&mut self, contexts: I) -> usize
    where
        I: IntoIterator<Item = Context>,
    {
        let mut skipped = 0;
        for c in contexts {
            self.history.extend(c.history);
            skipped += self.stat.combine(c.stat);
        }
        skipped
    }

    /// Snapshot of everything recorded so far, `None` before the first
    /// finished attempt.
    pub fn report(&self) -> Option<Report> {
        let first = self.history.first()?;
        let mut start = first.start;
        let mut end = first.end;

        let mut all = Vec::with_capacity(self.history.len());
        let mut ok = Vec::with_capacity(self.history.len());
        let mut results = ResultCounts::default();

        for h in &self.history {
            start = start.min(h.start);
            end = end.max(h.end);

            all.push(h.elapsed());
            if h.is_ok() {
                ok.push(h.elapsed());
            }

            match h.result {
                DroneResult::Ok => results.ok += 1,
                DroneResult::ConnectFail => results.connect_fail += 1,
                DroneResult::ResponseBroken => results.response_broken += 1,
            }
        }

        Some(Report {
            time: DurationReport::analyze(&all),
            ok_time: DurationReport::analyze(&ok),
            results,
            span: end.saturating_duration_since(start),
            stat: self.stat.report(),
        })
    }
}
