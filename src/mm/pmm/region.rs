use crate::mm::addr::{PhysAddr, PhysRange};

/// Tipos de região do memory map (numeração Multiboot 1..=5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
}

impl MemoryRegionType {
    /// Converte o campo `type` do memory map. Tipos desconhecidos são
    /// tratados como reservados.
    pub fn from_multiboot(kind: u32) -> Self {
        match kind {
            1 => Self::Usable,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            _ => Self::Reserved,
        }
    }
}

/// Uma região contígua de memória física
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub range: PhysRange,
    pub kind: MemoryRegionType,
}

impl MemoryRegion {
    pub const fn new(start: u64, len: u64, kind: MemoryRegionType) -> Self {
        Self {
            range: PhysRange::from_len(start, len),
            kind,
        }
    }

    pub fn start(&self) -> PhysAddr {
        self.range.start
    }

    pub fn end(&self) -> PhysAddr {
        self.range.end
    }

    /// Número de frames inteiros nessa região
    pub fn frame_count(&self) -> usize {
        self.range.inner_frames().1 as usize
    }

    pub fn is_usable(&self) -> bool {
        self.kind == MemoryRegionType::Usable
    }
}
