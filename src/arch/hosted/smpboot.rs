//! "INIT/SIPI" simulado: cada AP vira uma thread do host.

use super::cpu::{self, CpuHalted};
use crate::arch::traits::CpuId;
use crate::core::smp::bringup::SecondaryStart;
use std::boxed::Box;
use std::format;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::vec::Vec;

#[derive(Default)]
pub struct ThreadStarter {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadStarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Espera todas as CPUs secundárias saírem do loop idle (após STOP).
    pub fn join_all(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                crate::kerror!("(SMP) thread de AP terminou em panic");
            }
        }
    }
}

impl SecondaryStart for ThreadStarter {
    fn start(&self, cpu: CpuId, entry: Box<dyn FnOnce() + Send>) -> bool {
        let spawned = thread::Builder::new()
            .name(format!("cpu{}", cpu))
            .spawn(move || {
                cpu::enter_cpu(cpu);
                let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
                cpu::leave_cpu();
                if let Err(payload) = outcome {
                    if !payload.is::<CpuHalted>() {
                        panic::resume_unwind(payload);
                    }
                }
            });
        match spawned {
            Ok(handle) => {
                self.handles
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(handle);
                true
            }
            Err(_) => false,
        }
    }
}
