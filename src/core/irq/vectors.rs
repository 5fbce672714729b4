/// Arquivo: core/irq/vectors.rs
///
/// Propósito: Mapa de vetores da IDT.
///
/// ```text
/// 0x00..0x1F  exceções da CPU (0x0E = page fault)
/// 0x20..0x37  IRQs externas (0x20 timer, 0x21 teclado)
/// 0x80        syscall
/// 0xF0..0xFE  IPIs
/// 0xFF        espúrio do LAPIC
/// ```

use crate::core::config::NR_IRQS;

// Exceções
pub const DIVIDE_ERROR: u8 = 0;
pub const DEBUG: u8 = 1;
pub const NMI: u8 = 2;
pub const BREAKPOINT: u8 = 3;
pub const OVERFLOW: u8 = 4;
pub const BOUND_RANGE: u8 = 5;
pub const INVALID_OPCODE: u8 = 6;
pub const DEVICE_NOT_AVAILABLE: u8 = 7;
pub const DOUBLE_FAULT: u8 = 8;
pub const INVALID_TSS: u8 = 10;
pub const SEGMENT_NOT_PRESENT: u8 = 11;
pub const STACK_FAULT: u8 = 12;
pub const GENERAL_PROTECTION: u8 = 13;
pub const PAGE_FAULT: u8 = 14;
pub const X87_FPU: u8 = 16;
pub const ALIGNMENT_CHECK: u8 = 17;
pub const MACHINE_CHECK: u8 = 18;
pub const SIMD_FPU: u8 = 19;
pub const EXCEPTION_END: u8 = 32;

/// Primeiro vetor de IRQ externa (linha 0).
pub const IRQ_BASE: u8 = 32;
pub const IRQ_TIMER: u8 = IRQ_BASE;
pub const IRQ_KEYBOARD: u8 = IRQ_BASE + 1;
pub const IRQ_END: u8 = IRQ_BASE + NR_IRQS as u8;

pub const SYSCALL: u8 = 0x80;

// IPIs
pub const IPI_BASE: u8 = 0xF0;
pub const IPI_RESCHEDULE: u8 = 0xF0;
pub const IPI_CALL_FUNCTION: u8 = 0xF1;
pub const IPI_TLB_INVALIDATE: u8 = 0xF2;
pub const IPI_STOP: u8 = 0xFD;
pub const IPI_END: u8 = 0xFF;

pub const SPURIOUS: u8 = 0xFF;

/// Exceções em que a CPU empilha um código de erro.
pub const fn has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10..=14 | 17 | 21 | 29 | 30)
}

/// Linha de IRQ correspondente ao vetor, se for uma IRQ externa.
pub const fn irq_line(vector: u8) -> Option<u8> {
    if vector >= IRQ_BASE && vector < IRQ_END {
        Some(vector - IRQ_BASE)
    } else {
        None
    }
}

pub const fn is_ipi(vector: u8) -> bool {
    vector >= IPI_BASE && vector < IPI_END
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_do_not_overlap() {
        assert!(EXCEPTION_END <= IRQ_BASE);
        assert!(IRQ_END <= SYSCALL);
        assert!(SYSCALL < IPI_BASE);
        assert_eq!(irq_line(IRQ_TIMER), Some(0));
        assert_eq!(irq_line(IRQ_KEYBOARD), Some(1));
        assert_eq!(irq_line(SYSCALL), None);
        assert!(is_ipi(IPI_STOP) && !is_ipi(SPURIOUS));
        assert!(has_error_code(PAGE_FAULT) && !has_error_code(BREAKPOINT));
    }
}
