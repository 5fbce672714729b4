/// Arquivo: x86/smpboot.rs
///
/// Propósito: Disparo das CPUs secundárias (APs) por INIT/SIPI.
///
/// Detalhes de Implementação:
/// - A AP acorda em modo real no endereço `SIPI_PAGE * 4096`. O trampolim
///   (16 bits -> 32 bits -> paginação) é copiado para lá antes de cada SIPI,
///   junto com CR3, pilha, entrada e `CpuId` da AP.
/// - O trampolim carrega o diretório de boot, que ainda mapeia a memória
///   baixa em identidade; por isso o núcleo só desfaz a identidade depois
///   que todas as APs subiram.
/// - Uma AP por vez: `Smp::boot_secondary` espera cada uma reportar online
///   antes de disparar a próxima, então os campos do trampolim e
///   `AP_ENTRY` não são compartilhados.
/// - APIC ID da AP = índice lógico (sem MADT).

use super::apic;
use super::cpu::Cpu;
use crate::arch::traits::{CpuId, CpuOps};
use crate::core::smp::bringup::SecondaryStart;
use crate::mm::config::KERNEL_BASE;
use alloc::boxed::Box;
use alloc::vec;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Página física do trampolim (0x8000)
pub const SIPI_PAGE: u8 = 0x08;
pub const TRAMPOLINE_PHYS: u32 = (SIPI_PAGE as u32) << 12;

const AP_STACK_SIZE: usize = 16 * 1024;

// Espera entre INIT e SIPI (sem timer calibrado: aproximação em PAUSEs)
const INIT_DELAY_SPINS: usize = 1_000_000;
const SIPI_DELAY_SPINS: usize = 20_000;

core::arch::global_asm!(
    ".section .text",
    ".code16",
    ".global nucleo_ap_trampoline",
    "nucleo_ap_trampoline:",
    "cli",
    "cld",
    "xor ax, ax",
    "mov ds, ax",
    "lgdt [0x8000 + (nucleo_tramp_gdtr - nucleo_ap_trampoline)]",
    "mov eax, cr0",
    "or eax, 1",
    "mov cr0, eax",
    // jmp far 0x08:tramp_pm
    ".byte 0xEA",
    ".word 0x8000 + (nucleo_tramp_pm - nucleo_ap_trampoline)",
    ".word 0x08",
    ".code32",
    "nucleo_tramp_pm:",
    "mov ax, 0x10",
    "mov ds, ax",
    "mov es, ax",
    "mov fs, ax",
    "mov gs, ax",
    "mov ss, ax",
    "mov eax, [0x8000 + (nucleo_tramp_cr3 - nucleo_ap_trampoline)]",
    "mov cr3, eax",
    "mov eax, cr4",
    // PSE
    "or eax, 0x10",
    "mov cr4, eax",
    "mov eax, cr0",
    // PG | WP
    "or eax, 0x80010000",
    "mov cr0, eax",
    "mov esp, [0x8000 + (nucleo_tramp_stack - nucleo_ap_trampoline)]",
    "mov eax, [0x8000 + (nucleo_tramp_entry - nucleo_ap_trampoline)]",
    "call eax",
    "2:",
    "hlt",
    "jmp 2b",
    ".align 8",
    "nucleo_tramp_gdt:",
    ".quad 0",
    ".quad 0x00CF9A000000FFFF",
    ".quad 0x00CF92000000FFFF",
    "nucleo_tramp_gdtr:",
    ".word 23",
    ".long 0x8000 + (nucleo_tramp_gdt - nucleo_ap_trampoline)",
    ".align 4",
    ".global nucleo_tramp_cr3",
    "nucleo_tramp_cr3: .long 0",
    ".global nucleo_tramp_stack",
    "nucleo_tramp_stack: .long 0",
    ".global nucleo_tramp_entry",
    "nucleo_tramp_entry: .long 0",
    ".global nucleo_ap_trampoline_end",
    "nucleo_ap_trampoline_end:",
);

extern "C" {
    static nucleo_ap_trampoline: u8;
    static nucleo_ap_trampoline_end: u8;
    static nucleo_tramp_cr3: u8;
    static nucleo_tramp_stack: u8;
    static nucleo_tramp_entry: u8;
}

type Entry = Box<dyn FnOnce() + Send>;

static AP_CPU: AtomicUsize = AtomicUsize::new(0);
static AP_ENTRY: AtomicUsize = AtomicUsize::new(0);

/// Primeiro código Rust da AP, já com paginação e pilha própria.
#[no_mangle]
extern "C" fn nucleo_ap_entry() -> ! {
    let cpu = AP_CPU.load(Ordering::Acquire);
    // SAFETY: primeira coisa que a AP faz, com IF desligado
    unsafe {
        super::init_cpu(cpu);
        apic::init_ap();
    }
    let raw = AP_ENTRY.swap(0, Ordering::AcqRel) as *mut Entry;
    if !raw.is_null() {
        // SAFETY: publicado por SipiStarter::start, consumido uma vez
        let entry = unsafe { Box::from_raw(raw) };
        (*entry)();
    }
    Cpu::hang()
}

/// Dispara APs com a sequência INIT, SIPI, SIPI do LAPIC.
pub struct SipiStarter {
    /// Diretório de boot (físico), que mapeia o trampolim em identidade
    boot_root: u32,
}

impl SipiStarter {
    pub fn new(boot_root: u32) -> Self {
        Self { boot_root }
    }

    /// Copia o trampolim e preenche os parâmetros desta AP.
    ///
    /// # Safety
    /// A página `TRAMPOLINE_PHYS` está reservada e mapeada na janela linear.
    unsafe fn install_trampoline(&self, stack_top: u32) {
        let start = &raw const nucleo_ap_trampoline as usize;
        let len = &raw const nucleo_ap_trampoline_end as usize - start;
        let dest = (KERNEL_BASE + TRAMPOLINE_PHYS) as usize as *mut u8;
        core::ptr::copy_nonoverlapping(start as *const u8, dest, len);

        let field = |sym: usize| dest.add(sym - start) as *mut u32;
        field(&raw const nucleo_tramp_cr3 as usize).write_volatile(self.boot_root);
        field(&raw const nucleo_tramp_stack as usize).write_volatile(stack_top);
        field(&raw const nucleo_tramp_entry as usize).write_volatile(nucleo_ap_entry as usize as u32);
    }
}

fn spin(iterations: usize) {
    for _ in 0..iterations {
        Cpu::pause();
    }
}

impl SecondaryStart for SipiStarter {
    fn start(&self, cpu: CpuId, entry: Entry) -> bool {
        let Some(lapic) = apic::lapic() else {
            crate::kerror!("(SMP) LAPIC ausente, AP não pode subir: ", cpu);
            return false;
        };
        let apic_id = cpu as u8;
        apic::assign(cpu, apic_id);

        // Pilha de boot da AP vira a pilha do idle dela: nunca é liberada
        let stack = Box::leak(vec![0u8; AP_STACK_SIZE].into_boxed_slice());
        let stack_top = (stack.as_mut_ptr() as usize + AP_STACK_SIZE) & !0xF;

        AP_CPU.store(cpu, Ordering::Release);
        AP_ENTRY.store(Box::into_raw(Box::new(entry)) as usize, Ordering::Release);
        // SAFETY: a página do trampolim é reservada no PMM durante o boot
        unsafe { self.install_trampoline(stack_top as u32) };

        crate::kdebug!("(SMP) INIT/SIPI para APIC id=", apic_id);
        lapic.send_init(apic_id);
        spin(INIT_DELAY_SPINS);
        lapic.send_startup(apic_id, SIPI_PAGE);
        spin(SIPI_DELAY_SPINS);
        lapic.send_startup(apic_id, SIPI_PAGE);
        true
    }
}
