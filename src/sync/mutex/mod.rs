//! Mutex bloqueante com dono

mod mutex;

pub use mutex::{Mutex, MutexGuard};
