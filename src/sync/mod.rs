//! # Synchronization Primitives
//!
//! Primitivas de sincronização para ambiente SMP.
//!
//! ## Hierarquia de Uso
//!
//! ```text
//! Spinlock    → Seções críticas curtas (não pode dormir)
//! WaitQueue   → Dormir até uma condição
//! Completion  → Esperar "isto terminou"
//! Mutex       → Seções que podem bloquear (pode dormir)
//! Semaphore   → Controle de recursos contáveis
//! ```
//!
//! ## Regras
//!
//! - **Spinlock**: Usar apenas quando NÃO pode dormir (IRQ handlers). Nenhum
//!   spinlock fica segurado através de um ponto de suspensão.
//! - **Mutex/Semaphore/Completion**: bloqueiam via scheduler; nunca em IRQ.
//! - **Ordem de Lock**: todo spinlock declara um [`LockRank`] e a ordem é
//!   verificada em builds de debug.

// =============================================================================
// PRIMITIVAS BÁSICAS
// =============================================================================

/// Ordem global de locks
pub mod rank;

/// Spinlock (busy-wait, não dorme)
pub mod spinlock;

/// Fila de espera
pub mod waitqueue;

// =============================================================================
// PRIMITIVAS BLOQUEANTES
// =============================================================================

pub mod completion;

/// Mutex (pode bloquear a tarefa)
pub mod mutex;

/// Semáforo (contagem de recursos)
pub mod semaphore;

#[cfg(test)]
mod test;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use completion::Completion;
pub use mutex::{Mutex, MutexGuard};
pub use rank::LockRank;
pub use semaphore::Semaphore;
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};
pub use waitqueue::{WaitEntry, WaitError, WaitFlags, WaitQueue};
