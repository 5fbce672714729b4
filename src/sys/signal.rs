//! Números de sinal entregues pelo núcleo às tarefas.
//!
//! A entrega (frame de sinal, handlers de usuário) é do colaborador externo;
//! aqui só existem os números e o conjunto pendente.

use core::sync::atomic::{AtomicU32, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    SigHup = 1,
    SigInt = 2,
    SigIll = 4,
    SigTrap = 5,
    SigBus = 7,
    SigFpe = 8,
    SigKill = 9,
    SigSegv = 11,
    SigTerm = 15,
    SigChld = 17,
    SigCont = 18,
    SigStop = 19,
}

impl Signal {
    pub const fn number(self) -> u8 {
        self as u8
    }

    const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Some(match n {
            1 => Self::SigHup,
            2 => Self::SigInt,
            4 => Self::SigIll,
            5 => Self::SigTrap,
            7 => Self::SigBus,
            8 => Self::SigFpe,
            9 => Self::SigKill,
            11 => Self::SigSegv,
            15 => Self::SigTerm,
            17 => Self::SigChld,
            18 => Self::SigCont,
            19 => Self::SigStop,
            _ => return None,
        })
    }
}

/// Conjunto de sinais pendentes de uma tarefa (bitmap de 32 bits).
#[derive(Debug, Default)]
pub struct SignalSet {
    bits: AtomicU32,
}

impl SignalSet {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn raise(&self, sig: Signal) {
        self.bits.fetch_or(sig.bit(), Ordering::AcqRel);
    }

    pub fn contains(&self, sig: Signal) -> bool {
        self.bits.load(Ordering::Acquire) & sig.bit() != 0
    }

    pub fn clear(&self, sig: Signal) {
        self.bits.fetch_and(!sig.bit(), Ordering::AcqRel);
    }

    /// Há algo que interrompe uma espera interrompível?
    pub fn any_pending(&self) -> bool {
        self.bits.load(Ordering::Acquire) & !(Signal::SigChld.bit() | Signal::SigCont.bit()) != 0
    }

    /// Retira o sinal de menor número pendente.
    pub fn take_next(&self) -> Option<Signal> {
        loop {
            let bits = self.bits.load(Ordering::Acquire);
            if bits == 0 {
                return None;
            }
            let n = bits.trailing_zeros();
            if self
                .bits
                .compare_exchange(bits, bits & !(1 << n), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Signal::from_number(n as u8);
            }
        }
    }
}
