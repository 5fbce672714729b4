/// Arquivo: x86/idt.rs
///
/// Propósito: Interrupt Descriptor Table (IDT) e stubs de entrada.
/// Todos os 256 vetores passam pelo mesmo caminho: o stub empilha um código
/// de erro falso (quando a CPU não empilha) e o número do vetor; o trecho
/// comum salva os registradores no formato de `InterruptFrame` e chama
/// `nucleo_trap`, que entrega ao núcleo.
///
/// Detalhes de Implementação:
/// - Stubs gerados por `.rept`, cada um alinhado a 16 bytes: o handler do
///   vetor `v` fica em `nucleo_isr_table + 16 * v`.
/// - Gate 0x80 (syscall) com DPL 3; os demais só podem ser disparados por
///   hardware ou pelo kernel.
/// - IPIs recebem EOI antes do despacho: o despacho pode trocar de tarefa e
///   só voltar a este frame muito depois.

use super::gdt::KERNEL_CODE_SEL;
use super::apic;
use crate::core::irq::vectors;
use crate::core::irq::InterruptFrame;
use core::mem::size_of;
use spin::Once;

const STUB_SIZE: u32 = 16;

core::arch::global_asm!(
    ".section .text",
    ".align 16",
    ".global nucleo_isr_table",
    "nucleo_isr_table:",
    ".set vec, 0",
    ".rept 256",
    ".align 16",
    ".if (vec == 8) || ((vec >= 10) && (vec <= 14)) || (vec == 17) || (vec == 21) || (vec == 29) || (vec == 30)",
    ".else",
    "push 0",
    ".endif",
    // push imm32
    ".byte 0x68",
    ".long vec",
    "jmp nucleo_isr_common",
    ".set vec, vec + 1",
    ".endr",
    "",
    "nucleo_isr_common:",
    "pushad",
    "push ds",
    "push es",
    "push fs",
    "push gs",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "cld",
    "push esp",
    "call nucleo_trap",
    "add esp, 4",
    "pop gs",
    "pop fs",
    "pop es",
    "pop ds",
    "popad",
    // vetor + código de erro
    "add esp, 8",
    "iretd",
);

extern "C" {
    static nucleo_isr_table: u8;
}

/// Ponto de entrada Rust de todo trap.
#[no_mangle]
extern "C" fn nucleo_trap(frame: *mut InterruptFrame) {
    // SAFETY: o stub passa o ESP que aponta para o frame recém-empilhado
    let frame = unsafe { &mut *frame };
    let vector = frame.vector();

    if vectors::is_ipi(vector) {
        apic::eoi();
    }

    match crate::core::kernel::get() {
        Some(kernel) => kernel.trap(frame),
        None => panic!(
            "(Trap) vetor {} antes do núcleo subir: eip={:#x} erro={:#x}",
            vector, frame.eip, frame.error
        ),
    }
}

/// Entrada da IDT (8 bytes em 32-bit)
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    /// Interrupt gate de 32 bits (IF desligado na entrada) com o DPL dado.
    pub fn new(handler: u32, dpl: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SEL.0,
            zero: 0,
            type_attr: 0x8E | ((dpl & 0x3) << 5),
            offset_high: (handler >> 16) as u16,
        }
    }
}

#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Idt {
    fn build() -> Self {
        // SAFETY: só o endereço do símbolo é usado
        let base = unsafe { &raw const nucleo_isr_table } as u32;
        let mut idt = Self {
            entries: [IdtEntry::missing(); 256],
        };
        for (vector, entry) in idt.entries.iter_mut().enumerate() {
            let dpl = if vector == vectors::SYSCALL as usize { 3 } else { 0 };
            *entry = IdtEntry::new(base + STUB_SIZE * vector as u32, dpl);
        }
        idt
    }
}

/// Descritor para LIDT
#[repr(C, packed)]
struct IdtDescriptor {
    limit: u16,
    base: u32,
}

static IDT: Once<Idt> = Once::new();

/// Carrega a IDT comum na CPU atual (a primeira chamada a monta).
///
/// # Safety
/// Ring 0; a GDT com `KERNEL_CODE_SEL` já deve estar carregada.
pub unsafe fn load() {
    let idt = IDT.call_once(Idt::build);
    let descriptor = IdtDescriptor {
        limit: (size_of::<Idt>() - 1) as u16,
        base: idt as *const Idt as u32,
    };
    core::arch::asm!("lidt [{}]", in(reg) &descriptor, options(readonly, nostack, preserves_flags));
}
