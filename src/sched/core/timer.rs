//! Tick do timer, prazos e sono.

use super::scheduler::Scheduler;
use crate::arch::{Cpu, CpuOps};
use crate::core::smp::TickKind;
use crate::sched::task::{TaskId, TaskState};
use alloc::vec::Vec;

/// CPU que avança o relógio global e dispara os timers.
const TIMEKEEPER_CPU: usize = 0;

impl Scheduler {
    /// Tick do timer na CPU atual (chamado em contexto de IRQ).
    ///
    /// Contabiliza o tick, dispara timers vencidos (só na CPU 0) e pede
    /// reescalonamento quando a fatia da tarefa corrente acaba.
    pub fn tick(&self, kind: TickKind) {
        let me = Cpu::current_id();
        let cpu = self.smp.cpu(me);
        cpu.ticks.account(kind);

        if me == TIMEKEEPER_CPU {
            let now = self.clock.tick();
            for id in self.expire_timers(now) {
                self.wake_up(id);
            }
        }

        let mut inner = self.lock();
        let current = cpu.current_raw();
        let resched = if current == cpu.idle_raw() {
            inner.policy.nr_queued(me) > 0
        } else {
            inner.policy.task_tick(me, TaskId::from_raw(current))
        };
        drop(inner);
        if resched {
            cpu.set_need_resched();
        }
    }

    fn expire_timers(&self, now: u64) -> Vec<TaskId> {
        let mut inner = self.lock();
        let later = inner.timers.split_off(&(now + 1, TaskId::from_raw(0)));
        let expired = core::mem::replace(&mut inner.timers, later);
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Dorme até `deadline` (em ticks) ou até alguém acordar a tarefa.
    ///
    /// O estado de sono já deve ter sido definido pelo chamador. Retorna
    /// `true` se o prazo venceu.
    pub fn schedule_timeout(&self, deadline: u64) -> bool {
        let cur = self.current();
        if self.clock.now() >= deadline {
            cur.set_state(TaskState::Running);
            return true;
        }

        let key = (deadline, cur.id());
        cur.set_deadline(Some(deadline));
        self.lock().timers.insert(key);
        self.schedule();
        self.lock().timers.remove(&key);
        cur.set_deadline(None);

        self.clock.now() >= deadline
    }

    /// Dorme sem interrupção por `ms` milissegundos.
    pub fn sleep_ms(&self, ms: u64) {
        let deadline = self.clock.deadline_in(self.clock.ms_to_ticks(ms));
        loop {
            self.set_current_state(TaskState::Uninterruptible);
            if self.schedule_timeout(deadline) {
                break;
            }
        }
        self.set_current_state(TaskState::Running);
    }

    /// Timers armados (diagnóstico).
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }
}
