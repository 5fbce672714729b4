//! # Swap Subsystem
//!
//! Backing store para páginas evicted.
//!
//! ## Contrato do backend
//!
//! `alloc` → entrada | `NoSpace`; `free`; `write` → ok | `Io`;
//! `read` → ok | `Io`. Chamado sem nenhum lock do VMM segurado e pode
//! bloquear.
//!
//! ## Entrada de swap na PTE
//!
//! Uma PTE não presente e não nula guarda a entrada nos bits 1..31 com o
//! bit 0 (present) zerado, por isso os IDs cabem em 31 bits e nunca são 0.

pub mod cache;
pub mod memory;

pub use cache::{SlotState, SwapCache};
pub use memory::MemorySwap;

use crate::mm::error::MmError;
use crate::sys::error::Errno;
use alloc::sync::Arc;
use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU64, Ordering};

/// Identificador opaco de um slot de swap (1..2^31)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapEntry(NonZeroU32);

impl SwapEntry {
    /// Maior ID representável numa PTE
    pub const MAX_ID: u32 = (1 << 31) - 1;

    pub fn new(id: u32) -> Option<Self> {
        if id > Self::MAX_ID {
            return None;
        }
        NonZeroU32::new(id).map(Self)
    }

    pub fn id(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for SwapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapEntry({})", self.id())
    }
}

/// Erros do backend de swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// Sem slots livres
    NoSpace,
    /// Falha de leitura/escrita no dispositivo
    Io,
    /// Entrada não alocada
    InvalidEntry,
}

impl SwapError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSpace => "swap cheio",
            Self::Io => "erro de I/O no swap",
            Self::InvalidEntry => "entrada de swap inválida",
        }
    }
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<SwapError> for Errno {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::NoSpace => Errno::ENOSPC,
            SwapError::Io => Errno::EIO,
            SwapError::InvalidEntry => Errno::EINVAL,
        }
    }
}

impl From<SwapError> for MmError {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::NoSpace => MmError::SwapFull,
            SwapError::Io => MmError::Io,
            SwapError::InvalidEntry => MmError::InvalidParameter,
        }
    }
}

/// Dispositivo de swap
pub trait SwapBackend: Send + Sync {
    fn alloc(&self) -> Result<SwapEntry, SwapError>;

    fn free(&self, entry: SwapEntry);

    /// Grava uma página inteira no slot.
    fn write(&self, entry: SwapEntry, page: &[u8]) -> Result<(), SwapError>;

    /// Lê o slot para uma página inteira.
    fn read(&self, entry: SwapEntry, page: &mut [u8]) -> Result<(), SwapError>;

    fn is_allocated(&self, entry: SwapEntry) -> bool;

    /// Slots em uso
    fn used(&self) -> usize;

    fn capacity(&self) -> usize;
}

/// Backend + swap cache, como o VMM os enxerga.
pub struct Swap {
    backend: Arc<dyn SwapBackend>,
    cache: SwapCache,
    swapped_out: AtomicU64,
    swapped_in: AtomicU64,
}

impl Swap {
    pub fn new(backend: Arc<dyn SwapBackend>) -> Self {
        crate::kinfo!("(Swap) Backend com slots: ", backend.capacity() as u64);
        Self {
            backend,
            cache: SwapCache::new(),
            swapped_out: AtomicU64::new(0),
            swapped_in: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &dyn SwapBackend {
        &*self.backend
    }

    pub fn cache(&self) -> &SwapCache {
        &self.cache
    }

    pub(crate) fn count_out(&self) {
        self.swapped_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_in(&self) {
        self.swapped_in.fetch_add(1, Ordering::Relaxed);
    }

    /// (páginas escritas, páginas lidas de volta)
    pub fn counters(&self) -> (u64, u64) {
        (
            self.swapped_out.load(Ordering::Relaxed),
            self.swapped_in.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_fit_in_pte() {
        assert!(SwapEntry::new(0).is_none());
        assert!(SwapEntry::new(SwapEntry::MAX_ID + 1).is_none());
        assert_eq!(SwapEntry::new(SwapEntry::MAX_ID).map(SwapEntry::id), Some(SwapEntry::MAX_ID));
    }

    #[test]
    fn errors_map_to_errno() {
        assert_eq!(Errno::from(SwapError::NoSpace), Errno::ENOSPC);
        assert_eq!(Errno::from(SwapError::Io), Errno::EIO);
        assert_eq!(MmError::from(SwapError::NoSpace), MmError::SwapFull);
    }
}
