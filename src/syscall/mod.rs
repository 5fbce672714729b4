//! Sistema de Syscalls do Núcleo
//!
//! Um vetor (`int 0x80`), número em EAX, seis argumentos em registradores,
//! resultado em EAX. A tabela tem 400 slots; número desconhecido ou slot
//! vazio devolve `-ENOSYS`.
//!
//! # Módulos
//!
//! - `abi`: Convenção de chamada (`SyscallArgs`)
//! - `numbers`: Constantes das syscalls
//! - `table`: Tabela de handlers e despacho
//! - `process`: exit, getpid, sched_yield

pub mod abi;
pub mod numbers;
pub mod process;
pub mod table;

pub use abi::SyscallArgs;
pub use process::register_core;
pub use table::{SyscallEnv, SyscallHandler, SyscallTable};

#[cfg(test)]
mod test;
