//! # Hardware Abstraction Layer (HAL)
//!
//! O módulo `arch` é a **única** ponte entre o núcleo (lógica agnóstica) e o
//! hardware. Toda instrução privilegiada, porta de I/O ou registrador de
//! controle passa por aqui.
//!
//! ## Plataformas
//!
//! | Módulo   | Quando                         | O que é                                   |
//! |----------|--------------------------------|-------------------------------------------|
//! | `x86`    | `target_os = "none"`, i686     | HAL real: asm, GDT/IDT, PIC/APIC, PIT     |
//! | `hosted` | qualquer outro target          | HAL simulada para a suíte de testes       |
//!
//! O núcleo importa apenas `crate::arch::Cpu` (implementa [`CpuOps`]),
//! `crate::arch::Context` e as funções de troca de contexto. Nenhum outro
//! módulo contém intrínsecos de plataforma.

pub mod mmio;
pub mod traits;

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod x86;

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use x86 as platform;

#[cfg(all(target_os = "none", not(target_arch = "x86")))]
compile_error!("nucleo bare-metal suporta apenas i686 (x86 32 bits)");

#[cfg(not(target_os = "none"))]
pub mod hosted;

#[cfg(not(target_os = "none"))]
pub use hosted as platform;

// Re-exports globais para o kernel usar
pub use platform::context::{run_guarded, switch_final, switch_to, Context};
pub use platform::Cpu;
pub use traits::*;
