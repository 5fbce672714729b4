//! Chamadas cruzadas entre CPUs (`smp_call`).
//!
//! O registro da chamada entra na fila de cada CPU alvo antes da IPI. Quem
//! espera continua atendendo as próprias IPIs enquanto gira, então duas CPUs
//! chamando uma à outra não travam.

use super::{CpuMask, IpiReason, Smp, SmpError};
use crate::arch::{Cpu, CpuId, CpuOps};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

pub type CallFn = dyn Fn(CpuId) + Send + Sync;

/// Uma chamada em andamento, compartilhada por todos os alvos.
pub struct CallRecord {
    func: Arc<CallFn>,
    started: AtomicUsize,
    remaining: AtomicUsize,
}

impl CallRecord {
    fn new(func: Arc<CallFn>, targets: usize) -> Self {
        Self {
            func,
            started: AtomicUsize::new(0),
            remaining: AtomicUsize::new(targets),
        }
    }

    fn run(&self, cpu: CpuId) {
        self.started.fetch_add(1, Ordering::AcqRel);
        (self.func)(cpu);
        // Release: o chamador que vê remaining == 0 vê os efeitos de func
        self.remaining.fetch_sub(1, Ordering::Release);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

impl Smp {
    /// Executa `func` em cada CPU de `targets`.
    ///
    /// Com `wait`, só retorna depois que todas terminaram. Se a CPU atual
    /// está no conjunto, a chamada local roda antes da espera, com IRQs
    /// desligadas. Todas as CPUs alvo precisam estar online.
    pub fn smp_call<F>(&self, targets: CpuMask, func: F, wait: bool) -> Result<(), SmpError>
    where
        F: Fn(CpuId) + Send + Sync + 'static,
    {
        let offline = CpuMask::from_bits(targets.bits() & !self.online_mask().bits());
        if let Some(cpu) = offline.first() {
            return Err(SmpError::Offline(cpu));
        }
        if targets.is_empty() {
            return Ok(());
        }

        let me = Cpu::current_id();
        let record = Arc::new(CallRecord::new(Arc::new(func), targets.count()));

        for cpu in targets.without(me).iter() {
            self.cpu(cpu).calls.lock_irqsave().push_back(record.clone());
            self.send_ipi(cpu, IpiReason::CallFunction);
        }

        if targets.contains(me) {
            let flags = Cpu::irq_disable_save();
            record.run(me);
            Cpu::irq_restore(flags);
        }

        if wait {
            while record.remaining() > 0 {
                self.handle_ipis();
                Cpu::pause();
            }
        }
        Ok(())
    }

    /// Atalho para uma única CPU.
    pub fn smp_call_single<F>(&self, cpu: CpuId, func: F, wait: bool) -> Result<(), SmpError>
    where
        F: Fn(CpuId) + Send + Sync + 'static,
    {
        self.smp_call(CpuMask::single(cpu), func, wait)
    }

    pub(super) fn run_calls(&self, me: CpuId) -> usize {
        let cpu = self.cpu(me);
        let mut ran = 0;
        loop {
            let Some(record) = cpu.calls.lock_irqsave().pop_front() else {
                return ran;
            };
            record.run(me);
            ran += 1;
        }
    }
}
