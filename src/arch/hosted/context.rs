//! Troca de contexto simulada por passagem de bastão.
//!
//! Cada tarefa é uma thread do host, mas só a que segura o bastão de uma CPU
//! executa. `switch_to` entrega o bastão à próxima tarefa (junto com a
//! identidade e o CR3 da CPU) e estaciona a anterior até recebê-lo de volta.

use super::cpu::{self, Cpu};
use crate::arch::traits::{CpuId, CpuOps};
use std::boxed::Box;
use std::panic::{self, AssertUnwindSafe};
use std::string::String;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Carga de unwind usada para encerrar a thread de uma tarefa que saiu.
pub struct TaskExited;

#[derive(Default)]
struct Baton {
    slot: Mutex<Option<(CpuId, u32)>>,
    cv: Condvar,
}

impl Baton {
    fn give(&self, cpu: CpuId, cr3: u32) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(slot.is_none(), "bastão entregue duas vezes");
        *slot = Some((cpu, cr3));
        self.cv.notify_one();
    }

    fn take(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some((cpu, cr3)) = slot.take() {
                cpu::adopt(cpu, cr3);
                return;
            }
            slot = self.cv.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Contexto salvo de uma tarefa.
#[derive(Default)]
pub struct Context {
    baton: Arc<Baton>,
}

impl Context {
    /// Contexto para a thread que já está executando (idle/boot).
    pub fn for_current() -> Self {
        Self::default()
    }

    /// Cria a thread de uma nova tarefa; ela espera o primeiro `switch_to`.
    pub fn spawn(name: &str, entry: Box<dyn FnOnce() + Send>) -> Self {
        let ctx = Self::default();
        let baton = ctx.baton.clone();
        let spawned = thread::Builder::new()
            .name(String::from(name))
            .spawn(move || {
                baton.take();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                    if !payload.is::<TaskExited>() {
                        panic::resume_unwind(payload);
                    }
                }
            });
        if spawned.is_err() {
            crate::kerror!("(Sched) host recusou criar thread de tarefa");
        }
        ctx
    }
}

/// Executa o corpo de uma tarefa. Um panic dentro dela vira código de
/// saída -1 em vez de derrubar o processo de teste inteiro.
pub fn run_guarded(entry: Box<dyn FnOnce() + Send>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(()) => 0,
        Err(payload) if payload.is::<TaskExited>() => panic::resume_unwind(payload),
        Err(_) => {
            crate::kerror!("(Sched) tarefa terminou em panic");
            -1
        }
    }
}

/// Salva `prev` e retoma `next` na CPU atual.
///
/// # Safety
/// `prev` deve ser o contexto da tarefa corrente e `next` um contexto
/// parado (não executando em nenhuma CPU).
pub unsafe fn switch_to(prev: &Context, next: &Context) {
    next.baton.give(Cpu::current_id(), Cpu::read_cr3());
    prev.baton.take();
}

/// Retoma `next` sem salvar a tarefa corrente (saída).
///
/// # Safety
/// Mesmas condições de [`switch_to`] para `next`; a tarefa corrente nunca
/// mais será retomada.
pub unsafe fn switch_final(next: &Context) -> ! {
    next.baton.give(Cpu::current_id(), Cpu::read_cr3());
    cpu::leave_cpu();
    panic::resume_unwind(Box::new(TaskExited))
}
