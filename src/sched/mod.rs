//! # Multitasking & Scheduler Subsystem
//!
//! O módulo `sched` transforma as CPUs físicas em uma abstração capaz de
//! executar muitas tarefas. Ele é o mecanismo; a ordem de execução é da
//! política plugável.
//!
//! ## 🎯 Propósito e Responsabilidade
//! - **Tarefa:** `Task` (TCB) com estado, CPU, afinidade, address space e sinais.
//! - **Troca de Contexto:** `schedule()` escolhe a próxima e chama a HAL
//!   (`arch::switch_to`); nenhum lock atravessa a troca.
//! - **Sono e Timers:** estados interrompível/ininterrompível, `schedule_timeout`
//!   e o tick que dispara os prazos.
//! - **Controle:** sinais, stop/cont, afinidade e migração entre CPUs.
//!
//! ## 🏗️ Arquitetura: Cooperative + Preemptive
//! 1. **Preemptivo:** o tick do timer liga `need_resched` quando a fatia acaba;
//!    o retorno de interrupção para modo usuário honra a flag.
//! 2. **Cooperativo:** tarefas de kernel cedem via `yield_now()` ou dormindo.
//!
//! ## 🔍 Análise Crítica
//!
//! ### ✅ Pontos Fortes
//! - **IDs com geração:** um `TaskId` recolhido nunca resolve para a tarefa
//!   que reutilizou o slot.
//! - **Protocolo on_rq/on_cpu:** acordar uma tarefa que ainda está saindo da
//!   CPU não a coloca em duas filas nem a executa em duas CPUs.
//!
//! ### ⚠️ Pontos de Atenção
//! - **Lock único:** tabela, filas e timers compartilham um spinlock. As filas
//!   já são por CPU dentro da política, então separar o lock é local.
//! - **Sem preempção em modo kernel:** uma tarefa de kernel que nunca cede
//!   segura a CPU.
//!
//! ## 🛠️ TODOs e Roadmap
//! - [ ] **TODO: (SMP)** Um lock por fila de CPU, com balanceamento periódico.

pub mod core;
pub mod policy;
pub mod task;

#[cfg(test)]
mod test;

pub use self::core::{MmContext, SchedError, Scheduler, SpawnOptions};
pub use policy::{RoundRobin, SchedPolicy};
pub use task::{Task, TaskId, TaskState};
