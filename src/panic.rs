//! Panic Handler.
//!
//! O "Airbag" do sistema. Quando o Rust detecta um estado irrecuperável,
//! esta função é chamada.
//!
//! # Comportamento
//! 1. Desabilita interrupções (evita loop de panics).
//! 2. Só o primeiro pânico segue: um pânico aninhado (inclusive em outra
//!    CPU) trava na hora.
//! 3. Manda STOP para as outras CPUs online.
//! 4. Loga local e mensagem na serial e trava a CPU (hlt loop).
//!
//! Nos builds hospedados o pânico é o do `std`; só o registro de "quem
//! entrou primeiro" é compartilhado.

use core::sync::atomic::{AtomicUsize, Ordering};

const NOBODY: usize = usize::MAX;

/// Como um pânico entrou no caminho de parada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicEntry {
    First,
    /// Já havia um pânico em andamento (na mesma CPU ou em outra)
    Nested { owner: usize },
}

/// Registro da CPU que entrou primeiro em pânico.
pub struct PanicLatch {
    owner: AtomicUsize,
}

impl PanicLatch {
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(NOBODY),
        }
    }

    pub fn enter(&self, cpu: usize) -> PanicEntry {
        match self
            .owner
            .compare_exchange(NOBODY, cpu, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => PanicEntry::First,
            Err(owner) => PanicEntry::Nested { owner },
        }
    }

    pub fn owner(&self) -> Option<usize> {
        match self.owner.load(Ordering::Acquire) {
            NOBODY => None,
            cpu => Some(cpu),
        }
    }
}

impl Default for PanicLatch {
    fn default() -> Self {
        Self::new()
    }
}

static LATCH: PanicLatch = PanicLatch::new();

/// Há um pânico em andamento?
pub fn panicking() -> bool {
    LATCH.owner().is_some()
}

#[cfg(target_os = "none")]
mod handler {
    use super::{PanicEntry, LATCH};
    use crate::arch::{Cpu, CpuOps};
    use crate::drivers::serial;
    use core::fmt::{self, Write};
    use core::panic::PanicInfo;

    struct SerialWriter;

    impl Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            serial::emit_str(s);
            Ok(())
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        Cpu::irq_disable();
        let me = Cpu::current_id();

        if let PanicEntry::Nested { .. } = LATCH.enter(me) {
            Cpu::hang();
        }

        if let Some(kernel) = crate::core::kernel::get() {
            kernel.smp.stop_others();
        }

        crate::kerror!("================ KERNEL PANIC ================");
        crate::kerror!("(Panic) CPU ", me);
        let mut out = SerialWriter;
        if let Some(location) = info.location() {
            let _ = writeln!(out, "Local: {}:{}", location.file(), location.line());
        }
        let _ = writeln!(out, "Motivo: {}", info.message());
        crate::kerror!("==============================================");

        Cpu::hang();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_panic_proceeds() {
        let latch = PanicLatch::new();
        assert_eq!(latch.owner(), None);
        assert_eq!(latch.enter(2), PanicEntry::First);
        assert_eq!(latch.enter(2), PanicEntry::Nested { owner: 2 });
        assert_eq!(latch.enter(0), PanicEntry::Nested { owner: 2 });
        assert_eq!(latch.owner(), Some(2));
    }
}
