//! Idle - o que cada CPU faz quando não há tarefa pronta.
//!
//! A idle de uma CPU é o próprio fluxo de boot dela (BSP ou AP), registrado
//! por `init_cpu`. Ela nunca entra em fila: é só o fallback do `pick_next`.

use super::scheduler::Scheduler;
use crate::arch::{Cpu, CpuOps};

impl Scheduler {
    /// Uma volta do loop idle.
    ///
    /// Atende IPIs, e escalona se houver trabalho; senão espera a próxima
    /// interrupção com IRQs habilitadas.
    pub fn idle_once(&self) {
        let cpu = self.smp.this_cpu();
        self.smp.handle_ipis();

        if cpu.need_resched() || !cpu.deferred.is_empty() || self.nr_queued(cpu.id()) > 0 {
            self.schedule();
        } else {
            Cpu::irq_enable();
            Cpu::halt();
        }
    }

    pub fn idle_loop(&self) -> ! {
        crate::kdebug!("(Idle) CPU ociosa entrando no loop. id=", Cpu::current_id());
        loop {
            self.idle_once();
        }
    }
}
