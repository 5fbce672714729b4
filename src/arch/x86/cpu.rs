//! Implementação i686 das operações de CPU (HAL).
//!
//! Usa Assembly inline para controle de interrupções, registradores de
//! controle e portas de I/O.
//!
//! # Segurança
//! Assume modo protegido 32 bits com paginação ligada, em Ring 0.

use super::apic;
use crate::arch::traits::{CpuId, CpuOps};
use core::arch::asm;

const EFLAGS_IF: u32 = 1 << 9;

pub struct Cpu;

impl Cpu {
    /// Executa a instrução CPUID: `(eax, ebx, ecx, edx)`.
    pub fn cpuid(leaf: u32) -> (u32, u32, u32, u32) {
        let (eax, ebx, ecx, edx): (u32, u32, u32, u32);
        // SAFETY: CPUID não tem efeitos colaterais; EBX é salvo porque o
        // LLVM pode usá-lo como registrador base.
        unsafe {
            asm!(
                "push ebx",
                "cpuid",
                "mov {0}, ebx",
                "pop ebx",
                out(reg) ebx,
                inout("eax") leaf => eax,
                inout("ecx") 0 => ecx,
                out("edx") edx,
                options(preserves_flags),
            );
        }
        (eax, ebx, ecx, edx)
    }

    pub fn read_eflags() -> u32 {
        let flags: u32;
        // SAFETY: só lê EFLAGS pela pilha
        unsafe { asm!("pushfd", "pop {}", out(reg) flags, options(preserves_flags)) };
        flags
    }

    /// # Safety
    /// MSR inválido gera #GP.
    pub unsafe fn read_msr(msr: u32) -> u64 {
        let (high, low): (u32, u32);
        asm!("rdmsr", in("ecx") msr, out("eax") low, out("edx") high, options(nomem, nostack, preserves_flags));
        ((high as u64) << 32) | low as u64
    }

    /// # Safety
    /// MSR inválido gera #GP; escrever MSRs muda o comportamento da CPU.
    pub unsafe fn write_msr(msr: u32, value: u64) {
        asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") value as u32,
            in("edx") (value >> 32) as u32,
            options(nostack, preserves_flags),
        );
    }
}

impl CpuOps for Cpu {
    #[inline]
    fn current_id() -> CpuId {
        apic::current_cpu()
    }

    #[inline]
    fn halt() {
        // SAFETY: HLT só para até a próxima interrupção
        unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    fn pause() {
        core::hint::spin_loop();
    }

    #[inline]
    fn irq_enable() {
        // SAFETY: a IDT é carregada antes de qualquer STI
        unsafe { asm!("sti", options(nomem, nostack)) };
    }

    #[inline]
    fn irq_disable() {
        // SAFETY: CLI nunca invalida memória
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    #[inline]
    fn interrupts_enabled() -> bool {
        Self::read_eflags() & EFLAGS_IF != 0
    }

    #[inline]
    fn read_cr2() -> u32 {
        let value: u32;
        // SAFETY: leitura de registrador de controle em Ring 0
        unsafe { asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    #[inline]
    fn read_cr3() -> u32 {
        let value: u32;
        // SAFETY: leitura de registrador de controle em Ring 0
        unsafe { asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    #[inline]
    unsafe fn write_cr3(root: u32) {
        asm!("mov cr3, {}", in(reg) root, options(nostack, preserves_flags));
    }

    #[inline]
    unsafe fn invlpg(va: u32) {
        asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
    }

    fn flush_tlb_local() {
        // SAFETY: recarregar o mesmo CR3 só descarta a TLB não-global
        unsafe { Self::write_cr3(Self::read_cr3()) };
    }

    fn tlb_lookup(_root: u32, _va: u32) -> Option<u32> {
        None
    }

    fn tlb_fill(_root: u32, _va: u32, _pte: u32) {}

    #[inline]
    unsafe fn inb(port: u16) -> u8 {
        let value: u8;
        asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
        value
    }

    #[inline]
    unsafe fn outb(port: u16, value: u8) {
        asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }

    fn send_ipi(target: CpuId, vector: u8) {
        apic::send_ipi(target, vector);
    }
}
