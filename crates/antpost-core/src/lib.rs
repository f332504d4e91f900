pub mod config;
pub mod context;
pub mod drone;
pub mod drones;
pub mod error;
pub mod interval;
pub mod mathfunc;
pub mod report;
pub mod run;
pub mod stats;

pub use config::*;
pub use context::*;
pub use drone::*;
pub use drones::*;
pub use error::*;
pub use report::*;
pub use run::*;
pub use stats::*;
