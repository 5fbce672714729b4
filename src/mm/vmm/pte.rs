//! # Entradas de Page Table (x86 32 bits, sem PAE)
//!
//! ```text
//!  31                     12 11  9 8 7 6 5 4 3 2 1 0
//! ┌─────────────────────────┬─────┬─┬─┬─┬─┬─┬─┬─┬─┬─┐
//! │      frame (PFN)        │ AVL │G│ │D│A│C│W│U│W│P│
//! └─────────────────────────┴─────┴─┴─┴─┴─┴─┴─┴─┴─┴─┘
//!                             └ bit 9 = COW (reservado ao SO)
//! ```
//!
//! Uma PTE não presente é vazia (zero) ou carrega uma entrada de swap nos
//! bits 1..31, com o bit 0 zerado.

use crate::mm::addr::Pfn;
use crate::mm::config::PAGE_SHIFT;
use crate::mm::swap::SwapEntry;
use core::fmt;

bitflags::bitflags! {
    /// Bits de flag de uma PTE / PDE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const PWT = 1 << 3;
        const PCD = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const GLOBAL = 1 << 8;
        /// Página compartilhada copy-on-write (nunca junto com WRITABLE)
        const COW = 1 << 9;
    }
}

/// Bits de flag (0..11)
const FLAGS_MASK: u32 = (1 << PAGE_SHIFT) - 1;

/// Entrada crua de page table
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(u32);

/// Leitura estruturada de uma PTE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteKind {
    None,
    Present(Pfn, PteFlags),
    Swap(SwapEntry),
}

impl Pte {
    pub const EMPTY: Self = Self(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn new(pfn: Pfn, flags: PteFlags) -> Self {
        Self((pfn.as_u32() << PAGE_SHIFT) | (flags | PteFlags::PRESENT).bits())
    }

    /// PTE não presente apontando para uma entrada de swap.
    pub fn swap(entry: SwapEntry) -> Self {
        Self(entry.id() << 1)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_present(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    pub fn pfn(self) -> Option<Pfn> {
        self.is_present().then(|| Pfn::new(self.0 >> PAGE_SHIFT))
    }

    pub fn swap_entry(self) -> Option<SwapEntry> {
        if self.is_present() {
            return None;
        }
        SwapEntry::new(self.0 >> 1)
    }

    pub fn kind(self) -> PteKind {
        if let Some(pfn) = self.pfn() {
            PteKind::Present(pfn, self.flags())
        } else if let Some(entry) = self.swap_entry() {
            PteKind::Swap(entry)
        } else {
            PteKind::None
        }
    }

    /// Mesma página com as flags trocadas (só para PTEs presentes).
    pub fn with_flags(self, flags: PteFlags) -> Self {
        debug_assert!(self.is_present());
        Self((self.0 & !FLAGS_MASK) | (flags | PteFlags::PRESENT).bits())
    }

    pub fn is_writable(self) -> bool {
        self.is_present() && self.flags().contains(PteFlags::WRITABLE)
    }

    pub fn is_cow(self) -> bool {
        self.is_present() && self.flags().contains(PteFlags::COW)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PteKind::None => write!(f, "Pte(vazia)"),
            PteKind::Present(pfn, flags) => write!(f, "Pte({:?}, {:?})", pfn, flags),
            PteKind::Swap(entry) => write!(f, "Pte({:?})", entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_entry_layout() {
        let pte = Pte::new(Pfn::new(0x1234), PteFlags::WRITABLE | PteFlags::USER);
        assert_eq!(pte.raw(), 0x0123_4007);
        assert_eq!(pte.pfn(), Some(Pfn::new(0x1234)));
        assert!(pte.is_writable());
        assert!(!pte.is_cow());

        let ro = pte.with_flags(PteFlags::USER | PteFlags::COW);
        assert_eq!(ro.pfn(), Some(Pfn::new(0x1234)));
        assert_eq!(ro.raw() & 0x200, 0x200);
        assert!(!ro.is_writable());
    }

    #[test]
    fn swap_entry_keeps_present_bit_clear() {
        let entry = SwapEntry::new(SwapEntry::MAX_ID).unwrap();
        let pte = Pte::swap(entry);
        assert!(!pte.is_present());
        assert!(!pte.is_empty());
        assert_eq!(pte.kind(), PteKind::Swap(entry));
        assert_eq!(Pte::EMPTY.kind(), PteKind::None);
    }
}
