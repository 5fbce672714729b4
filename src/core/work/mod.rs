//! Trabalho diferido (bottom halves).

pub mod deferred;

pub use deferred::{DeferredQueue, DeferredWork};
