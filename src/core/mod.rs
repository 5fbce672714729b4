//! Core Module
//!
//! Composição do núcleo: handoff de boot, configuração, interrupções, SMP,
//! tempo, trabalho diferido e o roteamento de traps (`kernel`).
//!
//! O ponto de entrada (`entry`) só existe na imagem bare-metal; todo o resto
//! também roda sobre a HAL simulada da suíte de testes.

pub mod boot;
pub mod config;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub mod entry;
pub mod irq;
pub mod kernel;
pub mod logging;
pub mod selftest;
pub mod smp;
pub mod time;
pub mod work;
