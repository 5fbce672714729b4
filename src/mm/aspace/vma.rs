//! # Virtual Memory Area (VMA)
//!
//! Cada região de memória virtual com intenção semântica: intervalo
//! `[start, end)` alinhado a página, proteção, compartilhamento, backing e
//! flags. As VMAs de um address space são disjuntas e ordenadas.

use crate::mm::addr::{Pfn, VirtAddr};
use crate::mm::cache::pagecache::{Inode, PageIndex};
use crate::mm::config::PAGE_SHIFT;
use crate::mm::vmm::pte::PteFlags;

bitflags::bitflags! {
    /// Proteção de página
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXEC.bits();
    }
}

impl Protection {
    pub fn can_read(self) -> bool {
        self.intersects(Self::READ | Self::WRITE | Self::EXEC)
    }

    pub fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_exec(self) -> bool {
        self.contains(Self::EXEC)
    }
}

bitflags::bitflags! {
    /// Flags de VMA
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VmaFlags: u8 {
        /// Pilha: cresce para baixo num fault logo abaixo do início
        const GROWS_DOWN = 1 << 0;
        /// Residente: nunca vai para o swap
        const LOCKED = 1 << 1;
    }
}

/// Privado (COW no fork) ou compartilhado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    Private,
    Shared,
}

/// Backing de uma VMA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaBacking {
    /// Zero-fill sob demanda
    Anonymous,
    /// Páginas do page cache; `offset` em bytes, alinhado a página
    File { inode: Inode, offset: u64 },
    /// Frames fixos (MMIO), sem refcount
    Device { base: Pfn },
}

/// Virtual Memory Area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub prot: Protection,
    pub sharing: Sharing,
    pub backing: VmaBacking,
    pub flags: VmaFlags,
}

impl Vma {
    pub fn anonymous(start: u32, end: u32, prot: Protection) -> Self {
        Self {
            start: VirtAddr::new(start),
            end: VirtAddr::new(end),
            prot,
            sharing: Sharing::Private,
            backing: VmaBacking::Anonymous,
            flags: VmaFlags::empty(),
        }
    }

    pub fn with_sharing(mut self, sharing: Sharing) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_backing(mut self, backing: VmaBacking) -> Self {
        self.backing = backing;
        self
    }

    pub fn with_flags(mut self, flags: VmaFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.start <= va && va < self.end
    }

    pub fn overlaps(&self, start: VirtAddr, end: VirtAddr) -> bool {
        self.start < end && start < self.end
    }

    pub fn len(&self) -> u32 {
        self.end.as_u32() - self.start.as_u32()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shared(&self) -> bool {
        self.sharing == Sharing::Shared
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(VmaFlags::LOCKED)
    }

    /// Página `va` dentro do arquivo (só VMAs de arquivo).
    pub fn file_page(&self, va: VirtAddr) -> Option<(Inode, PageIndex)> {
        match self.backing {
            VmaBacking::File { inode, offset } => {
                let rel = (va.page_base().as_u32() - self.start.as_u32()) >> PAGE_SHIFT;
                Some((inode, (offset >> PAGE_SHIFT) as PageIndex + rel))
            }
            _ => None,
        }
    }

    /// Frame de dispositivo que cobre `va` (só VMAs de dispositivo).
    pub fn device_frame(&self, va: VirtAddr) -> Option<Pfn> {
        match self.backing {
            VmaBacking::Device { base } => {
                Some(base.add((va.page_base().as_u32() - self.start.as_u32()) >> PAGE_SHIFT))
            }
            _ => None,
        }
    }

    /// Flags de PTE para uma página desta VMA. Privadas de arquivo e
    /// páginas COW entram sem WRITABLE; PROT_NONE entra sem USER.
    pub fn pte_flags(&self, writable: bool) -> PteFlags {
        let mut flags = PteFlags::empty();
        if self.prot.can_read() {
            flags |= PteFlags::USER;
        }
        if writable && self.prot.can_write() {
            flags |= PteFlags::WRITABLE;
        }
        if matches!(self.backing, VmaBacking::Device { .. }) {
            flags |= PteFlags::PCD;
        }
        flags
    }

    /// Divide em `[start, at)` e `[at, end)`; o deslocamento de arquivo
    /// da segunda metade é ajustado.
    pub fn split_at(&self, at: VirtAddr) -> (Self, Self) {
        debug_assert!(self.start < at && at < self.end && at.is_page_aligned());
        let delta = at.as_u32() - self.start.as_u32();
        let mut low = *self;
        let mut high = *self;
        low.end = at;
        high.start = at;
        high.backing = match self.backing {
            VmaBacking::File { inode, offset } => VmaBacking::File {
                inode,
                offset: offset + delta as u64,
            },
            VmaBacking::Device { base } => VmaBacking::Device {
                base: base.add(delta >> PAGE_SHIFT),
            },
            VmaBacking::Anonymous => VmaBacking::Anonymous,
        };
        (low, high)
    }

    /// Remove `[start, end)` desta VMA. Devolve as sobras (0, 1 ou 2).
    pub fn carve(&self, start: VirtAddr, end: VirtAddr) -> (Option<Self>, Option<Self>) {
        let before = (self.start < start).then(|| self.split_at(start).0);
        let after = (end < self.end).then(|| self.split_at(end).1);
        (before, after)
    }

    /// Parte de `[start, end)` que cai nesta VMA.
    pub fn clip(&self, start: VirtAddr, end: VirtAddr) -> Self {
        let mut vma = *self;
        if vma.start < start {
            vma = vma.split_at(start).1;
        }
        if end < vma.end {
            vma = vma.split_at(end).0;
        }
        vma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carve_middle_leaves_two_pieces() {
        let vma = Vma::anonymous(0x1000, 0x5000, Protection::RW);
        let (before, after) = vma.carve(VirtAddr::new(0x2000), VirtAddr::new(0x3000));
        assert_eq!(before.map(|v| (v.start.as_u32(), v.end.as_u32())), Some((0x1000, 0x2000)));
        assert_eq!(after.map(|v| (v.start.as_u32(), v.end.as_u32())), Some((0x3000, 0x5000)));

        let (b, a) = vma.carve(VirtAddr::new(0x1000), VirtAddr::new(0x5000));
        assert!(b.is_none() && a.is_none());
    }

    #[test]
    fn split_moves_file_offset() {
        let vma = Vma::anonymous(0x10000, 0x14000, Protection::READ)
            .with_backing(VmaBacking::File { inode: 9, offset: 0x2000 });
        let (_, high) = vma.split_at(VirtAddr::new(0x12000));
        assert_eq!(high.backing, VmaBacking::File { inode: 9, offset: 0x4000 });
        assert_eq!(high.file_page(VirtAddr::new(0x13abc)), Some((9, 5)));
    }

    #[test]
    fn read_only_file_mapping_never_gets_writable_pte() {
        let vma = Vma::anonymous(0, 0x1000, Protection::READ);
        assert!(!vma.pte_flags(true).contains(PteFlags::WRITABLE));
        let rw = Vma::anonymous(0, 0x1000, Protection::RW);
        assert!(rw.pte_flags(true).contains(PteFlags::WRITABLE));
        assert!(!rw.pte_flags(false).contains(PteFlags::WRITABLE));
    }
}
