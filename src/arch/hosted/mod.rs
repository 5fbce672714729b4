//! # HAL simulada (builds hospedados)
//!
//! Executa o núcleo inteiro como código de usuário para a suíte de testes.
//!
//! | Conceito de hardware | Simulação                                            |
//! |----------------------|------------------------------------------------------|
//! | CPU lógica           | thread do host com `CPU_ID` thread-local             |
//! | IF (EFLAGS.IF)       | flag thread-local                                    |
//! | CR2 / CR3            | registradores thread-local; CR3 segue a CPU na troca |
//! | TLB                  | tabela thread-local `(raiz, vpn) -> pte`             |
//! | RAM física           | `PhysArena`, bloco alinhado do heap do host          |
//! | IPI                  | bit pendente + `unpark` da thread da CPU alvo        |
//! | Troca de contexto    | bastão (Mutex + Condvar) por tarefa                  |
//! | INIT/SIPI            | `std::thread::spawn`                                 |
//!
//! Entregas de IPI acontecem quando a CPU alvo faz polling (loop idle ou
//! espera ativa de chamadas cruzadas), o que basta para exercitar os
//! protocolos de shootdown e de chamada cruzada.

pub mod context;
pub mod cpu;
pub mod memory;
pub mod smpboot;

pub use cpu::{enter_cpu, leave_cpu, set_cr2, Cpu, CpuHalted};
pub use memory::PhysArena;
pub use smpboot::ThreadStarter;
