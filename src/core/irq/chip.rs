/// Arquivo: core/irq/chip.rs
///
/// Propósito: Abstração do controlador de interrupções.
/// O núcleo fala com o controlador só por [`IrqChip`]; o 8259 vive aqui
/// (precisa apenas de portas de I/O), o IOAPIC fica em `arch::x86::apic`.
///
/// # Remapeamento
/// Por padrão o PIC usa vetores 0-15, que conflitam com exceções da CPU.
/// Remapeamos para 32-47.

use super::vectors::IRQ_BASE;
use super::IrqError;
use crate::arch::{Cpu, CpuOps};
use crate::core::smp::CpuMask;
use crate::sync::{LockRank, Spinlock};

/// Disparo de uma linha
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Edge,
    Level,
}

pub trait IrqChip: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quantas linhas o controlador atende.
    fn nr_lines(&self) -> u8;

    fn mask(&self, line: u8);

    fn unmask(&self, line: u8);

    /// Reconhece a chegada (antes do handler). No-op onde o hardware já faz.
    fn ack(&self, line: u8);

    /// Fim de interrupção (depois do handler).
    fn eoi(&self, line: u8);

    fn set_affinity(&self, line: u8, cpus: CpuMask) -> Result<(), IrqError>;

    fn set_type(&self, line: u8, trigger: Trigger) -> Result<(), IrqError>;
}

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
/// Edge/Level Control Registers
const ELCR1: u16 = 0x4D0;
const ELCR2: u16 = 0x4D1;

const PIC_EOI: u8 = 0x20;
const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const CASCADE_LINE: u8 = 2;

struct PicState {
    /// Bit ligado = linha mascarada (IMR dos dois PICs)
    masks: u16,
    /// Bit ligado = linha por nível (ELCR)
    level: u16,
}

/// Cadeia de 8259 (Master + Slave), 16 linhas.
pub struct Pic8259 {
    offset: u8,
    state: Spinlock<PicState>,
}

impl Pic8259 {
    pub const fn new() -> Self {
        Self {
            offset: IRQ_BASE,
            state: Spinlock::new(
                LockRank::IrqChip,
                PicState {
                    masks: 0xFFFF,
                    level: 0,
                },
            ),
        }
    }

    /// Remapeia para `IRQ_BASE..IRQ_BASE+16` com todas as linhas mascaradas
    /// (exceto a cascata).
    pub fn init(&self) {
        crate::kdebug!("(PIC) init: remapeando IRQs para o vetor ", self.offset);
        let mut state = self.state.lock_irqsave();
        state.masks = 0xFFFF & !(1 << CASCADE_LINE);
        // SAFETY: portas do 8259 pertencem a este driver
        unsafe {
            Cpu::outb(PIC1_CMD, ICW1_INIT);
            Cpu::outb(PIC2_CMD, ICW1_INIT);
            Cpu::outb(PIC1_DATA, self.offset);
            Cpu::outb(PIC2_DATA, self.offset + 8);
            // ICW3: slave na IRQ2
            Cpu::outb(PIC1_DATA, 1 << CASCADE_LINE);
            Cpu::outb(PIC2_DATA, CASCADE_LINE);
            Cpu::outb(PIC1_DATA, ICW4_8086);
            Cpu::outb(PIC2_DATA, ICW4_8086);
        }
        Self::write_masks(state.masks);
        crate::kinfo!("(PIC) Inicializado e remapeado");
    }

    /// Mascara tudo (troca para o APIC).
    pub fn disable(&self) {
        let mut state = self.state.lock_irqsave();
        state.masks = 0xFFFF;
        Self::write_masks(state.masks);
    }

    /// IMR atual (diagnóstico).
    pub fn masks(&self) -> u16 {
        self.state.lock_irqsave().masks
    }

    pub fn level_lines(&self) -> u16 {
        self.state.lock_irqsave().level
    }

    fn write_masks(masks: u16) {
        // SAFETY: IMRs do 8259
        unsafe {
            Cpu::outb(PIC1_DATA, masks as u8);
            Cpu::outb(PIC2_DATA, (masks >> 8) as u8);
        }
    }

    fn update(&self, line: u8, masked: bool) {
        if line >= 16 {
            return;
        }
        let mut state = self.state.lock_irqsave();
        if masked {
            state.masks |= 1 << line;
        } else {
            state.masks &= !(1 << line);
        }
        Self::write_masks(state.masks);
    }
}

impl Default for Pic8259 {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqChip for Pic8259 {
    fn name(&self) -> &'static str {
        "8259"
    }

    fn nr_lines(&self) -> u8 {
        16
    }

    fn mask(&self, line: u8) {
        self.update(line, true);
    }

    fn unmask(&self, line: u8) {
        self.update(line, false);
    }

    fn ack(&self, _line: u8) {
        // INTA do hardware já reconheceu
    }

    fn eoi(&self, line: u8) {
        // SAFETY: registradores de comando do 8259
        unsafe {
            if line >= 8 {
                Cpu::outb(PIC2_CMD, PIC_EOI);
            }
            Cpu::outb(PIC1_CMD, PIC_EOI);
        }
    }

    fn set_affinity(&self, line: u8, cpus: CpuMask) -> Result<(), IrqError> {
        if line >= 16 {
            return Err(IrqError::InvalidLine);
        }
        // O 8259 só entrega na BSP
        if cpus == CpuMask::single(0) {
            Ok(())
        } else {
            Err(IrqError::Unsupported)
        }
    }

    fn set_type(&self, line: u8, trigger: Trigger) -> Result<(), IrqError> {
        if line >= 16 {
            return Err(IrqError::InvalidLine);
        }
        // IRQ 0, 1, 2, 8 e 13 são sempre por borda
        if trigger == Trigger::Level && matches!(line, 0 | 1 | 2 | 8 | 13) {
            return Err(IrqError::Unsupported);
        }
        let mut state = self.state.lock_irqsave();
        match trigger {
            Trigger::Level => state.level |= 1 << line,
            Trigger::Edge => state.level &= !(1 << line),
        }
        // SAFETY: ELCR do chipset
        unsafe {
            Cpu::outb(ELCR1, state.level as u8);
            Cpu::outb(ELCR2, (state.level >> 8) as u8);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! Controlador falso que registra as operações recebidas.

    use super::{IrqChip, IrqError, Trigger};
    use crate::core::smp::CpuMask;
    use std::sync::Mutex;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Mask(u8),
        Unmask(u8),
        Ack(u8),
        Eoi(u8),
        Type(u8, Trigger),
    }

    #[derive(Default)]
    pub struct RecordingChip {
        ops: Mutex<Vec<Op>>,
    }

    impl RecordingChip {
        pub fn take(&self) -> Vec<Op> {
            core::mem::take(&mut *self.ops.lock().unwrap())
        }

        fn push(&self, op: Op) {
            self.ops.lock().unwrap().push(op);
        }
    }

    impl IrqChip for RecordingChip {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn nr_lines(&self) -> u8 {
            24
        }

        fn mask(&self, line: u8) {
            self.push(Op::Mask(line));
        }

        fn unmask(&self, line: u8) {
            self.push(Op::Unmask(line));
        }

        fn ack(&self, line: u8) {
            self.push(Op::Ack(line));
        }

        fn eoi(&self, line: u8) {
            self.push(Op::Eoi(line));
        }

        fn set_affinity(&self, _line: u8, _cpus: CpuMask) -> Result<(), IrqError> {
            Ok(())
        }

        fn set_type(&self, line: u8, trigger: Trigger) -> Result<(), IrqError> {
            self.push(Op::Type(line, trigger));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pic_tracks_masks_and_trigger_modes() {
        let pic = Pic8259::new();
        pic.init();
        assert_eq!(pic.masks(), 0xFFFB);
        pic.unmask(0);
        pic.unmask(9);
        assert_eq!(pic.masks(), 0xFDFA);
        pic.mask(0);
        assert_eq!(pic.masks() & 1, 1);

        assert_eq!(pic.set_type(0, Trigger::Level), Err(IrqError::Unsupported));
        assert_eq!(pic.set_type(11, Trigger::Level), Ok(()));
        assert_eq!(pic.level_lines(), 1 << 11);
        assert_eq!(pic.set_affinity(11, CpuMask::of(&[1])), Err(IrqError::Unsupported));
        assert_eq!(pic.set_type(16, Trigger::Edge), Err(IrqError::InvalidLine));

        pic.disable();
        assert_eq!(pic.masks(), 0xFFFF);
    }
}
