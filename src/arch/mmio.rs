//! Acesso a registradores mapeados em memória (MMIO).
//!
//! Toda leitura/escrita passa por `volatile::VolatilePtr`, de modo que o
//! compilador não funde, reordena nem elimina acessos a registradores de
//! dispositivo (LAPIC, IOAPIC).

use core::ptr::NonNull;
use volatile::VolatilePtr;

/// Janela de registradores de 32 bits.
pub struct MmioRegion {
    base: NonNull<u32>,
    len: usize,
}

// SAFETY: a região aponta para registradores de hardware, não para dados Rust;
// a serialização dos acessos é responsabilidade do driver dono.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// # Safety
    /// `base` deve estar mapeado (uncached) por `len` bytes durante toda a vida
    /// da região, e alinhado a 4 bytes.
    pub unsafe fn new(base: NonNull<u32>, len: usize) -> Self {
        Self { base, len }
    }

    fn register(&self, offset: usize) -> VolatilePtr<'_, u32> {
        assert!(offset % 4 == 0 && offset + 4 <= self.len, "MMIO fora da janela");
        // SAFETY: offset validado contra a janela informada em new()
        unsafe { VolatilePtr::new(self.base.add(offset / 4)) }
    }

    #[inline]
    pub fn read(&self, offset: usize) -> u32 {
        self.register(offset).read()
    }

    #[inline]
    pub fn write(&self, offset: usize, value: u32) {
        self.register(offset).write(value);
    }

    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::MmioRegion;
    use core::ptr::NonNull;

    #[test]
    fn reads_back_written_registers() {
        let mut regs = [0u32; 64];
        let base = NonNull::new(regs.as_mut_ptr()).unwrap();
        let region = unsafe { MmioRegion::new(base, 64 * 4) };
        region.write(0xB0, 0);
        region.write(0x20, 0x0300_0000);
        assert_eq!(region.read(0x20) >> 24, 3);
        assert_eq!(region.read(0xB0), 0);
    }

    #[test]
    #[should_panic(expected = "MMIO fora da janela")]
    fn rejects_out_of_window_offsets() {
        let mut regs = [0u32; 4];
        let base = NonNull::new(regs.as_mut_ptr()).unwrap();
        let region = unsafe { MmioRegion::new(base, 16) };
        region.read(16);
    }
}
