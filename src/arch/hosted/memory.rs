//! RAM física simulada.

use crate::mm::addr::PhysAddr;
use crate::mm::linear::LinearMap;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Bloco do heap do host que faz o papel de RAM física a partir de `base`.
pub struct PhysArena {
    ptr: NonNull<u8>,
    layout: Layout,
    base: PhysAddr,
}

// SAFETY: a arena é só memória crua; o acesso concorrente é mediado pelo PMM/VMM.
unsafe impl Send for PhysArena {}
unsafe impl Sync for PhysArena {}

impl PhysArena {
    /// Aloca `size` bytes zerados representando `[base, base + size)`.
    pub fn new(base: PhysAddr, size: usize) -> Self {
        assert!(base.is_page_aligned() && size % 4096 == 0 && size > 0);
        let layout = match Layout::from_size_align(size, 4096) {
            Ok(layout) => layout,
            Err(_) => panic!("layout de arena inválido"),
        };
        // SAFETY: layout com tamanho não nulo
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };
        Self { ptr, layout, base }
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    pub fn end(&self) -> PhysAddr {
        PhysAddr::new(self.base.as_u64() + self.layout.size() as u64)
    }

    /// Mapa linear do kernel sobre esta arena.
    ///
    /// A arena deve sobreviver a todo subsistema construído com o mapa.
    pub fn linear_map(&self) -> LinearMap {
        // SAFETY: toda a janela [base, end) está alocada e pertence à arena
        unsafe { LinearMap::new(self.base, self.end(), self.ptr.as_ptr() as usize) }
    }
}

impl Drop for PhysArena {
    fn drop(&mut self) {
        // SAFETY: mesmo layout usado em alloc_zeroed
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
