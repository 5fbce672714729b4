//! Políticas de escalonamento
//!
//! O núcleo só define o mecanismo (estados, filas, troca de contexto). Quem
//! vai primeiro é decidido por um [`SchedPolicy`] plugável, chamado sempre
//! com o lock do scheduler segurado.

mod round_robin;

pub use round_robin::RoundRobin;

use crate::arch::CpuId;
use crate::sched::task::TaskId;

pub trait SchedPolicy: Send {
    fn name(&self) -> &'static str;

    /// Coloca a tarefa na fila da CPU.
    fn enqueue(&mut self, cpu: CpuId, task: TaskId);

    /// Tira a tarefa da fila da CPU. `false` se ela não estava lá.
    fn dequeue(&mut self, cpu: CpuId, task: TaskId) -> bool;

    /// Próxima tarefa para a CPU (removida da fila).
    fn pick_next(&mut self, cpu: CpuId) -> Option<TaskId>;

    /// Tick do timer com `task` executando. `true` pede reescalonamento.
    fn task_tick(&mut self, cpu: CpuId, task: TaskId) -> bool;

    /// Tarefas esperando na fila da CPU.
    fn nr_queued(&self, cpu: CpuId) -> usize;
}
