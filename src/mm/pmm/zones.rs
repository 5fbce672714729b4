//! # Zonas de Memória Física
//!
//! Divide a memória física em zonas para diferentes usos.
//!
//! ## 🎯 Propósito
//!
//! - **DMA** (0 - 16 MiB): dispositivos ISA legados (24 bits)
//! - **Normal** (16 MiB - 896 MiB): lowmem, coberta pelo mapa linear do kernel
//! - **High** (≥ 896 MiB): só acessível por mapeamentos explícitos
//!
//! ## 🏗️ Fallback
//!
//! Um pedido só desce de zona, nunca sobe:
//! - High → Normal → DMA
//! - Normal → DMA
//! - DMA → só DMA

use super::buddy::{FreeArea, PfnSpan};
use crate::mm::addr::{PhysAddr, Pfn};
use crate::mm::config::{ZONE_DMA_END, ZONE_NORMAL_END};
use crate::sync::{LockRank, Spinlock, SpinlockGuard};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Tipo de zona de memória
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ZoneType {
    Dma = 0,
    Normal = 1,
    High = 2,
}

impl ZoneType {
    pub const ALL: [Self; 3] = [Self::Dma, Self::Normal, Self::High];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Limite inferior da zona (inclusivo)
    pub const fn lower_limit(self) -> u64 {
        match self {
            Self::Dma => 0,
            Self::Normal => ZONE_DMA_END,
            Self::High => ZONE_NORMAL_END,
        }
    }

    /// Limite superior da zona (exclusivo)
    pub const fn upper_limit(self) -> u64 {
        match self {
            Self::Dma => ZONE_DMA_END,
            Self::Normal => ZONE_NORMAL_END,
            Self::High => crate::mm::config::PHYS_LIMIT,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Dma => "DMA",
            Self::Normal => "Normal",
            Self::High => "High",
        }
    }

    /// Zonas a tentar, em ordem, para um pedido com esta dica.
    pub const fn fallback(self) -> &'static [ZoneType] {
        match self {
            Self::High => &[Self::High, Self::Normal, Self::Dma],
            Self::Normal => &[Self::Normal, Self::Dma],
            Self::Dma => &[Self::Dma],
        }
    }

    pub fn of(pfn: Pfn) -> Self {
        let addr = pfn.phys().as_u64();
        if addr < ZONE_DMA_END {
            Self::Dma
        } else if addr < ZONE_NORMAL_END {
            Self::Normal
        } else {
            Self::High
        }
    }
}

/// Limiares de frames livres
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    /// Abaixo disto só pedidos ATOMIC
    pub min: usize,
    pub low: usize,
    pub high: usize,
}

impl Watermarks {
    /// 1/128 da zona, com piso de 4 frames.
    pub fn for_total(total: usize) -> Self {
        if total == 0 {
            return Self::default();
        }
        let min = (total / 128).max(4).min(total / 2);
        Self {
            min,
            low: min + min / 4,
            high: min + min / 2,
        }
    }
}

/// Retrato dos contadores de uma zona
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneStats {
    pub total: usize,
    pub free: usize,
    pub allocated: usize,
    pub reserved: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Contadores. Só mudam com o lock da zona (exceto active/inactive), mas
/// são lidos sem lock.
#[derive(Default)]
pub(super) struct Counters {
    pub total: AtomicUsize,
    pub free: AtomicUsize,
    pub allocated: AtomicUsize,
    pub reserved: AtomicUsize,
    pub active: AtomicUsize,
    pub inactive: AtomicUsize,
}

impl Counters {
    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::AcqRel);
    }

    pub fn sub(counter: &AtomicUsize, n: usize) {
        counter.fetch_sub(n, Ordering::AcqRel);
    }
}

/// Uma zona: listas do buddy + contadores
pub struct Zone {
    kind: ZoneType,
    span: PfnSpan,
    area: Spinlock<FreeArea>,
    pub(super) counters: Counters,
    min: AtomicUsize,
    low: AtomicUsize,
    high: AtomicUsize,
}

impl Zone {
    /// Zona `kind` restrita à faixa gerenciada `[first, end)`.
    pub fn new(kind: ZoneType, first: Pfn, end: Pfn) -> Self {
        let lo = PhysAddr::new(kind.lower_limit()).pfn().max(first);
        let hi_addr = kind.upper_limit().min(end.phys().as_u64());
        let hi = PhysAddr::new(hi_addr).pfn().max(lo);
        Self {
            kind,
            span: PfnSpan { start: lo, end: hi },
            area: Spinlock::new(LockRank::Zone, FreeArea::new()),
            counters: Counters::default(),
            min: AtomicUsize::new(0),
            low: AtomicUsize::new(0),
            high: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> ZoneType {
        self.kind
    }

    pub fn span(&self) -> PfnSpan {
        self.span
    }

    pub(super) fn lock(&self) -> SpinlockGuard<'_, FreeArea> {
        self.area.lock_irqsave()
    }

    /// Lock sem salvar IRQs, para quem trava várias zonas de uma vez já
    /// com interrupções desligadas.
    pub(super) fn lock_nested(&self) -> SpinlockGuard<'_, FreeArea> {
        self.area.lock()
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks {
            min: self.min.load(Ordering::Relaxed),
            low: self.low.load(Ordering::Relaxed),
            high: self.high.load(Ordering::Relaxed),
        }
    }

    /// Recalcula os limiares a partir do total atual.
    pub(super) fn update_watermarks(&self) {
        let wm = Watermarks::for_total(self.counters.total.load(Ordering::Acquire));
        self.min.store(wm.min, Ordering::Relaxed);
        self.low.store(wm.low, Ordering::Relaxed);
        self.high.store(wm.high, Ordering::Relaxed);
    }

    pub fn free_frames(&self) -> usize {
        self.counters.free.load(Ordering::Acquire)
    }

    pub fn total_frames(&self) -> usize {
        self.counters.total.load(Ordering::Acquire)
    }

    /// Pedido de `pages` pode sair desta zona sem furar `min`?
    pub(super) fn allows(&self, pages: usize, atomic: bool) -> bool {
        let free = self.free_frames();
        if atomic {
            return free >= pages;
        }
        free >= pages + self.min.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ZoneStats {
        let c = &self.counters;
        ZoneStats {
            total: c.total.load(Ordering::Acquire),
            free: c.free.load(Ordering::Acquire),
            allocated: c.allocated.load(Ordering::Acquire),
            reserved: c.reserved.load(Ordering::Acquire),
            active: c.active.load(Ordering::Acquire),
            inactive: c.inactive.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_only_goes_down() {
        assert_eq!(ZoneType::Dma.fallback(), &[ZoneType::Dma]);
        assert_eq!(ZoneType::Normal.fallback(), &[ZoneType::Normal, ZoneType::Dma]);
        assert_eq!(ZoneType::High.fallback()[0], ZoneType::High);
    }

    #[test]
    fn zone_span_is_clipped_to_managed_memory() {
        let first = PhysAddr::new(8 << 20).pfn();
        let end = PhysAddr::new(32 << 20).pfn();
        let dma = Zone::new(ZoneType::Dma, first, end);
        let normal = Zone::new(ZoneType::Normal, first, end);
        let high = Zone::new(ZoneType::High, first, end);
        assert_eq!(dma.span().len(), (8 << 20) / 4096);
        assert_eq!(normal.span().len(), (16 << 20) / 4096);
        assert!(high.span().is_empty());
    }

    #[test]
    fn watermarks_scale_with_zone() {
        let wm = Watermarks::for_total(4096);
        assert_eq!(wm.min, 32);
        assert!(wm.min < wm.low && wm.low < wm.high);
        assert_eq!(Watermarks::for_total(16).min, 4);
    }
}
