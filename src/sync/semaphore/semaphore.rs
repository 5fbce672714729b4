//! Semáforo para controle de recursos

use crate::sched::Scheduler;
use crate::sync::waitqueue::{WaitError, WaitFlags, WaitQueue};
use core::sync::atomic::{AtomicI32, Ordering};

/// Semáforo de contagem
pub struct Semaphore {
    count: AtomicI32,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Self {
            count: AtomicI32::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    /// Decrementa (P/wait/acquire), dormindo enquanto for zero
    pub fn down(&self, sched: &Scheduler) {
        // Espera exclusiva sem sinal nem prazo: não falha
        let _ = self
            .waiters
            .wait_event_with(sched, WaitFlags::EXCLUSIVE, None, || self.try_down());
    }

    pub fn down_interruptible(&self, sched: &Scheduler) -> Result<(), WaitError> {
        self.waiters.wait_event_with(
            sched,
            WaitFlags::EXCLUSIVE | WaitFlags::INTERRUPTIBLE,
            None,
            || self.try_down(),
        )
    }

    /// Como `down`, desistindo após `ticks`.
    pub fn down_timeout(&self, sched: &Scheduler, ticks: u64) -> Result<(), WaitError> {
        let deadline = sched.clock().deadline_in(ticks);
        self.waiters
            .wait_event_with(sched, WaitFlags::EXCLUSIVE, Some(deadline), || self.try_down())
    }

    /// Tenta decrementar sem bloquear
    pub fn try_down(&self) -> bool {
        let mut count = self.count.load(Ordering::Acquire);
        loop {
            if count <= 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => count = actual,
            }
        }
    }

    /// Incrementa (V/signal/release) e acorda um waiter
    pub fn up(&self, sched: &Scheduler) {
        self.count.fetch_add(1, Ordering::Release);
        self.waiters.wake_one(sched);
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }
}
