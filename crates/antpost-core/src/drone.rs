use std::future::Future;
use std::pin::Pin;

use crate::context::{Context, DroneResult};

/// One schedulable unit of benchmark work.
///
/// `run` performs exactly one attempt against the worker's [`Context`]: it must
/// call `step(Connected)` once a connection is up and `step(Responsed)` once
/// the response is complete, in that order. `next` yields the drone to run
/// after this one; `None` ends the worker's chain.
pub trait Drone: Send {
    fn run<'a>(
        &'a mut self,
        context: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = DroneResult> + Send + 'a>>;

    fn next(&mut self) -> Option<Box<dyn Drone>>;
}
