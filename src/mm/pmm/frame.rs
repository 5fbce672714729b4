//! Descritores de frame físico.
//!
//! Um `FrameDesc` por frame da faixa gerenciada, numa tabela densa indexada
//! por `pfn - base`. Os campos são atômicos: refcount e tag são lidos sem
//! lock; estado, ordem e links só mudam com o lock da zona.

use crate::mm::addr::Pfn;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Link nulo das listas livres
pub const NIL: u32 = u32::MAX;

/// Marca de frame que não é cabeça de bloco
pub const NOT_HEAD: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    /// Buraco no memory map (não gerenciado)
    Absent = 0,
    Free = 1,
    Reserved = 2,
    Allocated = 3,
}

impl FrameState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Free,
            2 => Self::Reserved,
            3 => Self::Allocated,
            _ => Self::Absent,
        }
    }
}

/// Dono lógico de um frame alocado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameUsage {
    None = 0,
    Kernel = 1,
    PageTable = 2,
    Anon = 3,
    PageCache = 4,
    SwapBuffer = 5,
}

impl FrameUsage {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Kernel,
            2 => Self::PageTable,
            3 => Self::Anon,
            4 => Self::PageCache,
            5 => Self::SwapBuffer,
            _ => Self::None,
        }
    }

    /// Páginas de usuário entram na contagem active/inactive.
    pub fn is_user(self) -> bool {
        matches!(self, Self::Anon | Self::PageCache)
    }
}

/// Descritor de um frame
#[repr(C)]
pub struct FrameDesc {
    state: AtomicU8,
    usage: AtomicU8,
    order: AtomicU8,
    active: AtomicU8,
    refcount: AtomicU32,
    pub(super) next: AtomicU32,
    pub(super) prev: AtomicU32,
}

impl FrameDesc {
    pub const fn absent() -> Self {
        Self {
            state: AtomicU8::new(FrameState::Absent as u8),
            usage: AtomicU8::new(FrameUsage::None as u8),
            order: AtomicU8::new(NOT_HEAD),
            active: AtomicU8::new(0),
            refcount: AtomicU32::new(0),
            next: AtomicU32::new(NIL),
            prev: AtomicU32::new(NIL),
        }
    }

    pub fn state(&self) -> FrameState {
        FrameState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(super) fn set_state(&self, state: FrameState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn usage(&self) -> FrameUsage {
        FrameUsage::from_u8(self.usage.load(Ordering::Acquire))
    }

    pub(super) fn set_usage(&self, usage: FrameUsage) {
        self.usage.store(usage as u8, Ordering::Release);
    }

    /// Ordem do bloco se for cabeça, `None` para frames internos.
    pub fn order(&self) -> Option<usize> {
        match self.order.load(Ordering::Acquire) {
            NOT_HEAD => None,
            o => Some(o as usize),
        }
    }

    pub(super) fn set_order(&self, order: Option<usize>) {
        let raw = order.map_or(NOT_HEAD, |o| o as u8);
        self.order.store(raw, Ordering::Release);
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(super) fn set_refcount(&self, count: u32) {
        self.refcount.store(count, Ordering::Release);
    }

    pub(super) fn inc_ref(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrementa e devolve o novo valor. Zero já era zero: violação.
    pub(super) fn dec_ref(&self) -> u32 {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("PMM: refcount negativo");
        }
        prev - 1
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    /// Troca a marca active; devolve o valor anterior.
    pub(super) fn swap_active(&self, active: bool) -> bool {
        self.active.swap(active as u8, Ordering::AcqRel) != 0
    }
}

/// Tabela de descritores, alocada dentro da própria RAM gerenciada.
pub struct FrameTable {
    base: Pfn,
    descs: *const FrameDesc,
    len: usize,
}

// SAFETY: os descritores só são acessados por atômicos; a tabela vive em
// frames reservados que nunca são liberados.
unsafe impl Send for FrameTable {}
unsafe impl Sync for FrameTable {}

impl FrameTable {
    /// Inicializa `len` descritores `Absent` em `mem`.
    ///
    /// # Safety
    /// `mem` deve apontar para `len * size_of::<FrameDesc>()` bytes alinhados,
    /// exclusivos da tabela e válidos enquanto ela existir.
    pub unsafe fn init_at(mem: *mut u8, base: Pfn, len: usize) -> Self {
        let descs = mem as *mut FrameDesc;
        for i in 0..len {
            // SAFETY: dentro da área fornecida pelo chamador
            unsafe { descs.add(i).write(FrameDesc::absent()) };
        }
        Self {
            base,
            descs,
            len,
        }
    }

    pub fn base(&self) -> Pfn {
        self.base
    }

    /// Primeiro PFN além da tabela.
    pub fn end(&self) -> Pfn {
        self.base.add(self.len as u32)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn covers(&self, pfn: Pfn) -> bool {
        pfn >= self.base && pfn < self.end()
    }

    /// Descritor do frame, se ele está na faixa gerenciada.
    pub fn get(&self, pfn: Pfn) -> Option<&FrameDesc> {
        if !self.covers(pfn) {
            return None;
        }
        // SAFETY: índice dentro de [0, len)
        Some(unsafe { &*self.descs.add(pfn.as_usize() - self.base.as_usize()) })
    }

    /// Como `get`, para quem já validou o PFN.
    pub(super) fn desc(&self, pfn: Pfn) -> &FrameDesc {
        match self.get(pfn) {
            Some(desc) => desc,
            None => panic!("PMM: PFN fora da tabela de frames"),
        }
    }

    /// Bytes necessários para `frames` descritores.
    pub const fn bytes_for(frames: usize) -> usize {
        frames * core::mem::size_of::<FrameDesc>()
    }
}
