//! Nucleo Kernel Library.
//!
//! Núcleo monolítico x86 de 32 bits: memória física e virtual, interrupções,
//! sincronização, SMP e a superfície que o scheduler usa.
//!
//! # Modos de build
//! - `target_os = "none"` (i686): `no_std`, HAL real em `arch::x86`, heap
//!   estático e `#[panic_handler]` próprio. O binário `src/main.rs` (feature
//!   `image`) só traz o `_start`.
//! - Qualquer outro target: a mesma lógica sobre `arch::hosted`, com `std`
//!   disponível para simular CPUs como threads. É onde os testes rodam.

#![cfg_attr(target_os = "none", no_std)]

// Habilitar alocação dinâmica (necessário para Vec/Box/Arc)
extern crate alloc;

// --- Módulos de Baixo Nível (Hardware) ---
pub mod arch; // HAL (CPU, GDT, IDT, APIC) ou simulação
pub mod drivers; // Serial (sink dos logs)

// --- Módulos Centrais ---
pub mod core; // Boot, IRQ, SMP, tempo, roteamento de traps
pub mod klib; // Utilitários internos (bitmap, autoteste, máquina de teste)
pub mod mm; // PMM, VMM, swap, page cache, heap
pub mod panic;
pub mod sync; // Spinlock com rank, WaitQueue, Mutex, Semaphore, Completion
pub mod sys; // Errno e sinais

// --- Subsistemas ---
pub mod sched; // Scheduler e tarefas
pub mod syscall; // Tabela de syscalls
