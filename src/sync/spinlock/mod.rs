//! Spinlock - bloqueio com busy-wait

mod spinlock;

pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};
