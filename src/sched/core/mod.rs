//! Scheduler principal

mod control;
mod idle;
mod scheduler;
mod timer;

pub use scheduler::{MmContext, SchedError, Scheduler, SpawnOptions};
