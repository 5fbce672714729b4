//! # Syscall Numbers Registry
//!
//! Catálogo dos números de syscall. A numeração segue a tabela i386
//! clássica (contrato binário com o userspace); o núcleo só implementa as
//! chamadas que dependem dele diretamente, o resto é registrado pelos
//! colaboradores em tempo de boot.
//!
//! | Número | Chamada       | Quem implementa |
//! |--------|---------------|-----------------|
//! | 1      | `exit`        | núcleo          |
//! | 20     | `getpid`      | núcleo          |
//! | 158    | `sched_yield` | núcleo          |
//! | demais | ...           | colaboradores   |

pub use crate::core::config::NR_SYSCALLS;

/// Encerra a tarefa atual.
/// Args: (exit_code: i32)
/// Retorno: Nunca retorna
pub const SYS_EXIT: usize = 1;

pub const SYS_FORK: usize = 2;
pub const SYS_READ: usize = 3;
pub const SYS_WRITE: usize = 4;
pub const SYS_OPEN: usize = 5;
pub const SYS_CLOSE: usize = 6;

/// Identificador da tarefa atual.
/// Args: nenhum
pub const SYS_GETPID: usize = 20;

pub const SYS_KILL: usize = 37;
pub const SYS_BRK: usize = 45;
pub const SYS_MUNMAP: usize = 91;
pub const SYS_CLONE: usize = 120;
pub const SYS_MPROTECT: usize = 125;

/// Cede o restante da fatia de tempo.
/// Args: nenhum
/// Retorno: 0
pub const SYS_SCHED_YIELD: usize = 158;

pub const SYS_NANOSLEEP: usize = 162;
pub const SYS_MMAP2: usize = 192;
