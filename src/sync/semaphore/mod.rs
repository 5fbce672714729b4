//! Semáforo de contagem

mod semaphore;

pub use semaphore::Semaphore;
