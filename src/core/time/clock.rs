/// Arquivo: core/time/clock.rs
///
/// Propósito: Tempo monotônico do núcleo (jiffies).
/// O timer da CPU 0 avança o contador; esperas temporizadas usam prazos
/// absolutos em jiffies.
///
/// Detalhes de Implementação:
/// - Um único `AtomicU64`; leituras não pegam lock.
/// - HZ é configurável no boot (`hz=`).

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct Clock {
    jiffies: AtomicU64,
    hz: AtomicU32,
}

impl Clock {
    pub const fn new(hz: u32) -> Self {
        Self {
            jiffies: AtomicU64::new(0),
            hz: AtomicU32::new(hz),
        }
    }

    /// Avança um tick e devolve o novo valor.
    pub fn tick(&self) -> u64 {
        self.jiffies.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.jiffies.load(Ordering::Acquire)
    }

    pub fn hz(&self) -> u32 {
        self.hz.load(Ordering::Relaxed)
    }

    /// Converte milissegundos em ticks, arredondando para cima.
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        let hz = self.hz() as u64;
        (ms * hz).div_ceil(1000)
    }

    /// Prazo absoluto `ticks` à frente de agora.
    pub fn deadline_in(&self, ticks: u64) -> u64 {
        self.now().saturating_add(ticks)
    }

    pub fn uptime_ms(&self) -> u64 {
        self.now() * 1000 / self.hz() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::Clock;

    #[test]
    fn ticks_and_conversions() {
        let clock = Clock::new(100);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.ms_to_ticks(15), 2);
        assert_eq!(clock.deadline_in(3), 5);
        assert_eq!(clock.uptime_ms(), 20);
    }
}
