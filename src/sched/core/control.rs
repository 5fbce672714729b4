//! Controle de tarefas por terceiros: sinais, stop/cont e afinidade.

use super::scheduler::{SchedError, Scheduler};
use crate::core::smp::CpuMask;
use crate::sched::task::{TaskId, TaskState};
use crate::sys::Signal;
use core::sync::atomic::Ordering;

impl Scheduler {
    /// Marca `sig` pendente e acorda a tarefa se ela estiver numa espera
    /// interrompível. SIGSTOP e SIGCONT agem direto no estado.
    pub fn send_signal(&self, id: TaskId, sig: Signal) -> Result<(), SchedError> {
        let task = self.task(id).ok_or(SchedError::NoSuchTask)?;
        if task.state() == TaskState::Zombie {
            return Ok(());
        }
        match sig {
            Signal::SigStop => self.stop(id),
            Signal::SigCont => {
                task.signals.raise(Signal::SigCont);
                self.cont(id)
            }
            _ => {
                task.signals.raise(sig);
                if sig == Signal::SigKill {
                    // Uma tarefa parada precisa voltar a rodar para morrer
                    self.cont(id)?;
                }
                self.wake_up_interruptible(id);
                Ok(())
            }
        }
    }

    /// Para a tarefa. Se ela estiver executando (ou dormindo), o pedido é
    /// aplicado no próximo `schedule()` dela.
    pub fn stop(&self, id: TaskId) -> Result<(), SchedError> {
        let mut inner = self.lock();
        let task = inner.tasks.get(id).cloned().ok_or(SchedError::NoSuchTask)?;
        if task.is_idle() {
            return Err(SchedError::IdleTask);
        }

        match task.state() {
            TaskState::Stopped | TaskState::Zombie => Ok(()),
            TaskState::Runnable
                if !task.is_on_cpu() && inner.policy.dequeue(task.cpu(), id) =>
            {
                task.set_state(TaskState::Stopped);
                task.on_rq.store(false, Ordering::Release);
                Ok(())
            }
            state => {
                task.request_stop(true);
                let cpu = task.cpu();
                drop(inner);
                if state == TaskState::Interruptible {
                    self.wake_up_interruptible(id);
                } else if state == TaskState::Running {
                    if id == self.current_id() {
                        self.schedule();
                    } else {
                        self.kick(cpu);
                    }
                }
                Ok(())
            }
        }
    }

    /// Retoma uma tarefa parada.
    pub fn cont(&self, id: TaskId) -> Result<(), SchedError> {
        let mut inner = self.lock();
        let task = inner.tasks.get(id).cloned().ok_or(SchedError::NoSuchTask)?;
        task.request_stop(false);
        if task.state() != TaskState::Stopped {
            return Ok(());
        }

        task.set_state(TaskState::Runnable);
        task.on_rq.store(true, Ordering::Release);
        let target = self.select_cpu(&inner, &task);
        task.set_cpu(target);
        inner.policy.enqueue(target, id);
        drop(inner);

        self.kick(target);
        Ok(())
    }

    /// Restringe as CPUs onde a tarefa pode executar, migrando-a se preciso.
    pub fn set_affinity(&self, id: TaskId, mask: CpuMask) -> Result<(), SchedError> {
        if mask.and(self.smp.online_mask()).is_empty() {
            return Err(SchedError::InvalidAffinity);
        }

        let mut inner = self.lock();
        let task = inner.tasks.get(id).cloned().ok_or(SchedError::NoSuchTask)?;
        if task.is_idle() {
            return Err(SchedError::IdleTask);
        }
        task.set_affinity(mask);

        let cpu = task.cpu();
        if mask.contains(cpu) {
            return Ok(());
        }

        match task.state() {
            TaskState::Runnable if inner.policy.dequeue(cpu, id) => {
                let target = self.select_cpu(&inner, &task);
                task.set_cpu(target);
                inner.policy.enqueue(target, id);
                drop(inner);
                self.kick(target);
            }
            TaskState::Running => {
                drop(inner);
                if id == self.current_id() {
                    // put_prev escolhe uma CPU permitida
                    self.yield_now();
                } else {
                    self.kick(cpu);
                }
            }
            // Dormindo ou parada: a CPU é escolhida ao acordar
            _ => {}
        }
        Ok(())
    }
}
