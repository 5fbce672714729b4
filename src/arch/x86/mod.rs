//! # HAL x86 (i686, bare-metal)
//!
//! | Módulo     | Conteúdo                                                   |
//! |------------|------------------------------------------------------------|
//! | `cpu`      | `Cpu` (CpuOps): CLI/STI, HLT, CR2/CR3, INVLPG, portas      |
//! | `gdt`      | GDT por CPU (seletores 0/8/16/24/32/40) e TSS              |
//! | `idt`      | IDT de 256 vetores e stubs de entrada                      |
//! | `context`  | Troca de contexto por pilha de kernel                      |
//! | `apic`     | LAPIC (EOI, IPI) e IOAPIC (controlador de IRQ)             |
//! | `pit`      | PIT 8254, fonte do tick                                    |
//! | `smpboot`  | INIT/SIPI e trampolim de modo real das APs                 |
//!
//! Só o stub de entrada (`idt`) e `_start` conhecem o layout de pilha;
//! todo o resto do núcleo vê `InterruptFrame` e `CpuOps`.

pub mod apic;
pub mod context;
pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod pit;
pub mod smpboot;

pub use cpu::Cpu;

/// Prepara a CPU atual para receber traps: GDT/TSS próprios e IDT comum.
///
/// # Safety
/// Uma vez por CPU, no início do boot dela, com interrupções desligadas.
pub unsafe fn init_cpu(cpu: usize) {
    gdt::init(cpu);
    idt::load();
}
