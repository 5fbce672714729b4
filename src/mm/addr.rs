//! Tipos de endereço físico, virtual e número de frame.

use crate::mm::config::{ENTRIES_PER_TABLE, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
use core::fmt;

/// Endereço físico (wrapper type-safe)
///
/// 64 bits para carregar valores do mapa de memória; o núcleo só gerencia
/// abaixo de 4 GiB (sem PAE).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    #[inline]
    pub const fn page_align_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    #[inline]
    pub const fn page_align_up(self) -> Self {
        Self((self.0 + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1))
    }

    /// Frame que contém este endereço
    #[inline]
    pub const fn pfn(self) -> Pfn {
        Pfn((self.0 >> PAGE_SHIFT) as u32)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

/// Número de frame físico (endereço / 4 KiB)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Pfn(u32);

impl Pfn {
    #[inline]
    pub const fn new(pfn: u32) -> Self {
        Self(pfn)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn phys(self) -> PhysAddr {
        PhysAddr((self.0 as u64) << PAGE_SHIFT)
    }

    #[inline]
    pub const fn add(self, frames: u32) -> Self {
        Self(self.0 + frames)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pfn({:#x})", self.0)
    }
}

/// Endereço virtual no espaço de 32 bits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn page_base(self) -> Self {
        Self(self.0 & PAGE_MASK)
    }

    #[inline]
    pub const fn page_offset(self) -> usize {
        (self.0 & !PAGE_MASK) as usize
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & !PAGE_MASK == 0
    }

    /// Índice no page directory (bits 22..31)
    #[inline]
    pub const fn pd_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Índice na page table (bits 12..21)
    #[inline]
    pub const fn pt_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) as usize) & (ENTRIES_PER_TABLE - 1)
    }

    /// Avança `bytes`, retornando `None` em overflow do espaço de 32 bits
    #[inline]
    pub const fn checked_add(self, bytes: u32) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

/// Intervalo físico semiaberto `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysRange {
    pub start: PhysAddr,
    pub end: PhysAddr,
}

impl PhysRange {
    pub const fn new(start: PhysAddr, end: PhysAddr) -> Self {
        Self { start, end }
    }

    pub const fn from_len(start: u64, len: u64) -> Self {
        Self {
            start: PhysAddr::new(start),
            end: PhysAddr::new(start + len),
        }
    }

    /// Frames inteiramente contidos no intervalo
    pub fn inner_frames(&self) -> (Pfn, u32) {
        let first = self.start.page_align_up().pfn();
        let last = self.end.page_align_down().pfn();
        (first, last.as_u32().saturating_sub(first.as_u32()))
    }

    /// Frames que tocam o intervalo (para reservas)
    pub fn outer_frames(&self) -> (Pfn, u32) {
        let first = self.start.page_align_down().pfn();
        let last = self.end.page_align_up().pfn();
        (first, last.as_u32().saturating_sub(first.as_u32()))
    }
}

/// Intervalo virtual semiaberto, alinhado a página
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtRange {
    pub start: VirtAddr,
    pub end: VirtAddr,
}

impl VirtRange {
    /// Valida alinhamento e não-vazio.
    pub fn new(start: u32, len: u32) -> Option<Self> {
        let end = start.checked_add(len)?;
        let range = Self {
            start: VirtAddr::new(start),
            end: VirtAddr::new(end),
        };
        (len > 0 && range.start.is_page_aligned() && range.end.is_page_aligned()).then_some(range)
    }

    pub fn pages(&self) -> usize {
        ((self.end.as_u32() - self.start.as_u32()) as usize) / PAGE_SIZE
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.start <= va && va < self.end
    }

    /// Endereços base de cada página do intervalo
    pub fn iter_pages(&self) -> impl Iterator<Item = VirtAddr> {
        let start = self.start.as_u32();
        (0..self.pages() as u32).map(move |i| VirtAddr::new(start + i * PAGE_SIZE as u32))
    }
}
