/// Arquivo: x86/pit.rs
///
/// Propósito: Programmable Interval Timer (8254), canal 0, como fonte do
/// tick periódico (linha 0 do controlador de IRQ).

use super::cpu::Cpu;
use crate::arch::traits::CpuOps;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Frequência base do 8254
pub const PIT_BASE_HZ: u32 = 1_193_182;

/// Canal 0, acesso lo/hi, modo 3 (onda quadrada), binário.
const MODE_RATE: u8 = 0x36;

/// Divisor de 16 bits para `hz` (0 no registrador vale 65536).
pub fn divisor(hz: u32) -> u16 {
    let div = PIT_BASE_HZ / hz.max(1);
    div.clamp(1, 0xFFFF) as u16
}

/// Programa o canal 0 para disparar `hz` vezes por segundo.
pub fn init(hz: u32) {
    let div = divisor(hz);
    // SAFETY: portas do 8254 pertencem a este driver
    unsafe {
        Cpu::outb(PIT_COMMAND, MODE_RATE);
        Cpu::outb(PIT_CHANNEL0, (div & 0xFF) as u8);
        Cpu::outb(PIT_CHANNEL0, (div >> 8) as u8);
    }
    crate::kinfo!("(PIT) Tick em Hz=", hz, " divisor=", div);
}
