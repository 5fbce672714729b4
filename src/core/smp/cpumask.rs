//! Conjuntos de CPUs (bitmask de 32 bits).

use crate::arch::CpuId;
use crate::core::config::MAX_CPUS;
use core::sync::atomic::{AtomicU32, Ordering};

/// Conjunto imutável de CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask(u32);

impl CpuMask {
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn single(cpu: CpuId) -> Self {
        Self(1 << cpu)
    }

    /// As primeiras `n` CPUs.
    pub const fn first_n(n: usize) -> Self {
        if n >= MAX_CPUS {
            Self(u32::MAX)
        } else {
            Self((1 << n) - 1)
        }
    }

    pub fn of(cpus: &[CpuId]) -> Self {
        cpus.iter().fold(Self::EMPTY, |m, &c| m.with(c))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, cpu: CpuId) -> bool {
        cpu < MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    pub const fn with(self, cpu: CpuId) -> Self {
        Self(self.0 | (1 << cpu))
    }

    pub const fn without(self, cpu: CpuId) -> Self {
        Self(self.0 & !(1 << cpu))
    }

    pub const fn and(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn first(self) -> Option<CpuId> {
        (!self.is_empty()).then(|| self.0.trailing_zeros() as CpuId)
    }

    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).filter(move |&c| self.contains(c))
    }
}

/// Conjunto de CPUs atualizável concorrentemente.
#[derive(Debug, Default)]
pub struct AtomicCpuMask(AtomicU32);

impl AtomicCpuMask {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn load(&self) -> CpuMask {
        CpuMask(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, cpu: CpuId) {
        self.0.fetch_or(1 << cpu, Ordering::AcqRel);
    }

    pub fn clear(&self, cpu: CpuId) {
        self.0.fetch_and(!(1 << cpu), Ordering::AcqRel);
    }

    pub fn contains(&self, cpu: CpuId) -> bool {
        self.load().contains(cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let m = CpuMask::of(&[1, 2, 3]);
        assert_eq!(m.count(), 3);
        assert!(!m.contains(0));
        assert_eq!(m.without(1).first(), Some(2));
        assert_eq!(m.iter().collect::<alloc::vec::Vec<_>>(), [1, 2, 3]);
        assert_eq!(CpuMask::first_n(2).bits(), 0b11);
        assert_eq!(CpuMask::first_n(MAX_CPUS).count(), MAX_CPUS);
    }
}
