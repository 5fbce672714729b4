/// Arquivo: x86/gdt.rs
///
/// Propósito: Global Descriptor Table (GDT) e Task State Segment (TSS)
/// de cada CPU. Modelo flat: todos os segmentos cobrem 4 GiB; o que
/// separa kernel de usuário é o DPL e a paginação.
///
/// Detalhes de Implementação:
/// - Uma GDT e um TSS por CPU (o TSS guarda o ESP0 da tarefa que roda
///   naquela CPU, usado na transição ring 3 -> ring 0).
/// - CS é recarregado com um far jump; DS/ES/FS/GS/SS com o seletor de dados.

use crate::core::config::MAX_CPUS;
use core::mem::size_of;

/// Seletor de segmento
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct SegmentSelector(pub u16);

impl SegmentSelector {
    pub const fn new(index: u16, rpl: u8) -> Self {
        Self((index << 3) | (rpl as u16))
    }
}

// Index 0: Null
// Index 1: Kernel Code (0x08)
// Index 2: Kernel Data (0x10)
// Index 3: User Code   (0x1B)
// Index 4: User Data   (0x23)
// Index 5: TSS         (0x28)
pub const KERNEL_CODE_SEL: SegmentSelector = SegmentSelector::new(1, 0);
pub const KERNEL_DATA_SEL: SegmentSelector = SegmentSelector::new(2, 0);
pub const USER_CODE_SEL: SegmentSelector = SegmentSelector::new(3, 3);
pub const USER_DATA_SEL: SegmentSelector = SegmentSelector::new(4, 3);
pub const TSS_SEL: SegmentSelector = SegmentSelector::new(5, 0);

const GDT_ENTRIES: usize = 6;

/// Entrada da GDT (8 bytes)
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    flags_limit_high: u8,
    base_high: u8,
}

impl GdtEntry {
    pub const fn null() -> Self {
        Self::flat(0, 0)
    }

    /// Segmento de 4 GiB, granularidade de 4 KiB, 32 bits (flags 0xC).
    const fn flat(access: u8, flags: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            flags_limit_high: flags | 0x0F,
            base_high: 0,
        }
    }

    pub const fn kernel_code() -> Self {
        Self::flat(0x9A, 0xC0) // Present, Ring 0, Code, Readable
    }

    pub const fn kernel_data() -> Self {
        Self::flat(0x92, 0xC0) // Present, Ring 0, Data, Writable
    }

    pub const fn user_code() -> Self {
        Self::flat(0xFA, 0xC0) // Present, Ring 3, Code, Readable
    }

    pub const fn user_data() -> Self {
        Self::flat(0xF2, 0xC0) // Present, Ring 3, Data, Writable
    }

    /// Descritor de TSS de 32 bits disponível (tipo 0x9), granularidade de byte.
    pub fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89,
            flags_limit_high: ((limit >> 16) & 0xF) as u8,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

/// Task State Segment de 32 bits. Só `esp0`/`ss0` são usados (sem troca
/// de tarefa por hardware).
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Tss {
    link: u32,
    pub esp0: u32,
    pub ss0: u32,
    unused: [u32; 22],
    trap: u16,
    pub iomap_base: u16,
}

impl Tss {
    pub const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SEL.0 as u32,
            unused: [0; 22],
            trap: 0,
            // Sem bitmap de I/O: ring 3 não acessa portas
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

impl Default for Tss {
    fn default() -> Self {
        Self::new()
    }
}

const EMPTY_GDT: [GdtEntry; GDT_ENTRIES] = [
    GdtEntry::null(),
    GdtEntry::kernel_code(),
    GdtEntry::kernel_data(),
    GdtEntry::user_code(),
    GdtEntry::user_data(),
    GdtEntry::null(), // TSS (preenchido no init)
];

// Uma por CPU; cada CPU só escreve na própria entrada
static mut GDT: [[GdtEntry; GDT_ENTRIES]; MAX_CPUS] = [EMPTY_GDT; MAX_CPUS];
static mut TSS: [Tss; MAX_CPUS] = [Tss::new(); MAX_CPUS];

/// Ponteiro da GDT (GDTR)
#[repr(C, packed)]
struct GdtDescriptor {
    limit: u16,
    base: u32,
}

/// Carrega a GDT e o TSS da CPU `cpu`.
///
/// # Safety
/// Uma vez por CPU, na própria CPU, com interrupções desligadas.
/// Recarrega CS, DS, ES, FS, GS, SS e TR.
pub unsafe fn init(cpu: usize) {
    let gdt = (&raw mut GDT[cpu]) as *mut [GdtEntry; GDT_ENTRIES];
    let tss = (&raw const TSS[cpu]) as u32;
    (*gdt)[TSS_SEL.0 as usize >> 3] = GdtEntry::tss(tss, (size_of::<Tss>() - 1) as u32);

    let gdtr = GdtDescriptor {
        limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
        base: gdt as u32,
    };
    core::arch::asm!("lgdt [{}]", in(reg) &gdtr, options(readonly, nostack, preserves_flags));

    core::arch::asm!(
        "push {kcode:e}",
        "lea {tmp}, [2f]",
        "push {tmp}",
        "retf",
        "2:",
        "mov ds, {kdata:e}",
        "mov es, {kdata:e}",
        "mov fs, {kdata:e}",
        "mov gs, {kdata:e}",
        "mov ss, {kdata:e}",
        "ltr {tss:x}",
        kcode = in(reg) KERNEL_CODE_SEL.0 as u32,
        kdata = in(reg) KERNEL_DATA_SEL.0 as u32,
        tss = in(reg) TSS_SEL.0,
        tmp = out(reg) _,
    );
}

/// Pilha de kernel que a CPU usa ao entrar de ring 3 (ESP0).
///
/// # Safety
/// Chamado na própria CPU `cpu`, com interrupções desligadas, antes de
/// retomar a tarefa dona de `stack_top`.
pub unsafe fn set_kernel_stack(cpu: usize, stack_top: u32) {
    let tss = &raw mut TSS[cpu];
    (*tss).esp0 = stack_top;
}
