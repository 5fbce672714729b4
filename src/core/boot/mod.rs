//! # Boot - Handoff do Bootloader
//!
//! Leitura da estrutura Multiboot 1 (memory map, linha de comando e
//! módulos). A sequência de boot em si fica em `core::entry`.

pub mod handoff;

pub use handoff::{BootError, BootInfo, BootMemory, BootModule, MULTIBOOT_BOOTLOADER_MAGIC};
