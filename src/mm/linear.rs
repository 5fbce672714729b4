//! Mapa linear do kernel (física → virtual por deslocamento fixo).
//!
//! No bare-metal a lowmem (0..896 MiB) fica em `KERNEL_BASE`; na HAL simulada
//! a janela aponta para a `PhysArena`. Em ambos os casos as traduções são
//! aritmética pura, válidas apenas dentro de `[phys_start, phys_end)`.

use crate::mm::addr::{PhysAddr, Pfn};

#[derive(Debug, Clone, Copy)]
pub struct LinearMap {
    phys_start: u64,
    phys_end: u64,
    virt_base: usize,
}

impl LinearMap {
    /// # Safety
    /// `[virt_base, virt_base + (end - start))` deve estar mapeado para
    /// `[start, end)` enquanto qualquer usuário do mapa existir.
    pub const unsafe fn new(start: PhysAddr, end: PhysAddr, virt_base: usize) -> Self {
        Self {
            phys_start: start.as_u64(),
            phys_end: end.as_u64(),
            virt_base,
        }
    }

    pub const fn phys_start(&self) -> PhysAddr {
        PhysAddr::new(self.phys_start)
    }

    pub const fn phys_end(&self) -> PhysAddr {
        PhysAddr::new(self.phys_end)
    }

    #[inline]
    pub fn covers(&self, phys: PhysAddr) -> bool {
        phys.as_u64() >= self.phys_start && phys.as_u64() < self.phys_end
    }

    #[inline]
    pub fn covers_frame(&self, pfn: Pfn) -> bool {
        self.covers(pfn.phys())
    }

    /// Ponteiro do kernel para um endereço físico coberto.
    #[inline]
    pub fn phys_to_virt(&self, phys: PhysAddr) -> *mut u8 {
        debug_assert!(self.covers(phys), "endereço fora do mapa linear");
        (self.virt_base + (phys.as_u64() - self.phys_start) as usize) as *mut u8
    }

    /// Endereço físico de um ponteiro dentro da janela linear.
    #[inline]
    pub fn virt_to_phys(&self, virt: *const u8) -> Option<PhysAddr> {
        let addr = virt as usize;
        let span = (self.phys_end - self.phys_start) as usize;
        if addr < self.virt_base || addr - self.virt_base >= span {
            return None;
        }
        Some(PhysAddr::new(self.phys_start + (addr - self.virt_base) as u64))
    }

    #[inline]
    pub fn frame_ptr(&self, pfn: Pfn) -> *mut u8 {
        self.phys_to_virt(pfn.phys())
    }
}
