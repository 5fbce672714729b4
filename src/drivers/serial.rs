// =============================================================================
// SERIAL DRIVER - SINK DE LOG
// =============================================================================
//
// Driver de Porta Serial (COM1) para logging de kernel.
//
// ARQUITETURA:
// - SEM Mutex/Spinlock: escrita direta byte a byte
// - SEM core::fmt: números saem por emit_hex/emit_dec
// - SEM alocação no caminho bare-metal
//
// Em builds hospedados (HAL simulada) a "UART" é o stderr do processo: cada
// thread acumula a linha corrente e a despeja inteira no emit_nl(), para que
// CPUs simuladas não intercalem caracteres.
//
// NOTA IMPORTANTE:
// Este driver NÃO garante exclusão mútua entre CPUs no bare-metal. Em SMP,
// linhas podem se intercalar. Isso é aceitável para debugging.
//
// =============================================================================

#[cfg(target_os = "none")]
use crate::arch::{Cpu, CpuOps};

// Porta de dados da COM1
#[cfg(target_os = "none")]
const COM1_DATA: u16 = 0x3F8;

// Line Status Register da COM1
#[cfg(target_os = "none")]
const COM1_STATUS: u16 = 0x3FD;

/// Inicializa a porta serial COM1 (UART 16550).
///
/// Deve ser chamada uma vez durante o early-boot.
/// Configura: 38400 baud, 8N1, FIFO habilitado.
#[cfg(target_os = "none")]
pub fn init() {
    // SAFETY: portas da COM1 pertencem exclusivamente a este driver
    unsafe {
        Cpu::outb(COM1_DATA + 1, 0x00); // Desabilita IRQs da UART
        Cpu::outb(COM1_DATA + 3, 0x80); // DLAB
        Cpu::outb(COM1_DATA, 0x03); // Divisor 3 = 38400 baud
        Cpu::outb(COM1_DATA + 1, 0x00);
        Cpu::outb(COM1_DATA + 3, 0x03); // 8N1
        Cpu::outb(COM1_DATA + 2, 0xC7); // FIFO, limpa, limiar 14 bytes
        Cpu::outb(COM1_DATA + 4, 0x0B); // RTS/DSR
    }
}

#[cfg(not(target_os = "none"))]
pub fn init() {}

/// Envia um único byte.
#[cfg(target_os = "none")]
#[inline]
pub fn emit(byte: u8) {
    // SAFETY: ver init()
    unsafe {
        while Cpu::inb(COM1_STATUS) & 0x20 == 0 {
            Cpu::pause();
        }
        Cpu::outb(COM1_DATA, byte);
    }
}

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static LINE: core::cell::RefCell<std::string::String> =
        const { core::cell::RefCell::new(std::string::String::new()) };
}

#[cfg(not(target_os = "none"))]
pub fn emit(byte: u8) {
    LINE.with(|line| line.borrow_mut().push(byte as char));
}

/// Envia uma string.
pub fn emit_str(s: &str) {
    #[cfg(not(target_os = "none"))]
    LINE.with(|line| line.borrow_mut().push_str(s));

    #[cfg(target_os = "none")]
    for byte in s.bytes() {
        emit(byte);
    }
}

/// Termina a linha corrente.
pub fn emit_nl() {
    #[cfg(not(target_os = "none"))]
    LINE.with(|line| {
        let mut line = line.borrow_mut();
        std::eprintln!("{}", line);
        line.clear();
    });

    #[cfg(target_os = "none")]
    {
        emit(b'\r');
        emit(b'\n');
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Envia um valor em hexadecimal, sem zeros à esquerda (`0x1f`).
pub fn emit_hex(value: u64) {
    emit(b'0');
    emit(b'x');
    let digits = if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(4)
    };
    for i in (0..digits).rev() {
        emit(HEX[((value >> (i * 4)) & 0xF) as usize]);
    }
}

/// Envia um valor em decimal.
pub fn emit_dec(mut value: u64) {
    let mut buf = [0u8; 20];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    for &b in &buf[pos..] {
        emit(b);
    }
}
