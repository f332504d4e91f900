use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::drone::Drone;

/// Run `workers` concurrent drone chains and merge their contexts.
///
/// Every worker gets its own chain from `drone.next()`; the template itself is
/// never run. `count == 0` means no attempt budget and a zero `duration` means
/// no deadline. Returns `None` when `workers == 0`.
///
/// A worker whose drone breaks the step protocol panics; its context is lost
/// and the remaining workers are still merged.
pub async fn run(
    drone: &mut dyn Drone,
    workers: usize,
    count: u64,
    duration: Duration,
) -> Option<Context> {
    if workers == 0 {
        return None;
    }

    info!(
        "Starting {} workers (count={}, duration={:?})",
        workers, count, duration
    );
    let started = Instant::now();

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let mut context = Context::new();
        if count > 0 {
            context.set_count(count);
        }

        if !duration.is_zero() {
            context.set_time(duration);
        }

        let chain = drone.next();
        handles.push(tokio::spawn(async move {
            run_chain(chain, &mut context).await;
            context
        }));
    }

    let mut contexts = Vec::with_capacity(workers);
    for (idx, h) in handles.into_iter().enumerate() {
        match h.await {
            Ok(context) => contexts.push(context),
            Err(e) => error!("Worker {} aborted: {}", idx, e),
        }
    }

    let finished = contexts.len();
    let mut contexts = contexts.into_iter();
    let mut merged = contexts.next().unwrap_or_default();
    let skipped = merged.combine(contexts);
    if skipped > 0 {
        warn!("Skipped {} ordinal merges with unrelated rank sets", skipped);
    }

    info!(
        "{}/{} workers finished {} attempts in {:?}",
        finished,
        workers,
        merged.history().len(),
        started.elapsed()
    );

    Some(merged)
}

async fn run_chain(mut drone: Option<Box<dyn Drone>>, context: &mut Context) {
    while let Some(mut d) = drone {
        if !context.start() {
            debug!("Worker stop condition reached");
            return;
        }

        let result = d.run(context).await;
        context.end(result);

        drone = d.next();
    }
}
