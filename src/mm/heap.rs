//! # Kernel Heap Allocator
//!
//! `Box`, `Vec` e `Arc` do kernel bare-metal. O heap é uma arena estática
//! no `.bss` (dentro da imagem, que já é reservada no PMM) administrada pelo
//! `linked_list_allocator`: existe antes do PMM, que precisa de `Vec` para
//! ser construído.
//!
//! Nos builds hospedados o alocador global é o do host e este módulo só
//! expõe as estatísticas (zeradas).

#[cfg(target_os = "none")]
mod imp {
    use core::ptr::addr_of_mut;
    use linked_list_allocator::LockedHeap;

    /// 8 MiB
    pub const HEAP_SIZE: usize = 8 * 1024 * 1024;

    #[repr(C, align(4096))]
    struct Arena([u8; HEAP_SIZE]);

    static mut ARENA: Arena = Arena([0; HEAP_SIZE]);

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    pub fn init() {
        // SAFETY: chamado uma vez no boot, antes de qualquer alocação; a
        // arena é usada só pelo alocador daqui em diante.
        unsafe {
            let base = addr_of_mut!(ARENA) as *mut u8;
            ALLOCATOR.lock().init(base, HEAP_SIZE);
        }
        crate::kinfo!("(MM) Heap inicializado, bytes=", HEAP_SIZE as u64);
    }

    pub fn usage() -> (usize, usize) {
        let heap = ALLOCATOR.lock();
        (heap.used(), heap.free())
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    pub const HEAP_SIZE: usize = 0;

    pub fn init() {}

    pub fn usage() -> (usize, usize) {
        (0, 0)
    }
}

pub use imp::HEAP_SIZE;

/// Prepara o heap. Primeira coisa do boot depois da pilha.
pub fn init() {
    imp::init();
}

/// (bytes em uso, bytes livres)
pub fn usage() -> (usize, usize) {
    imp::usage()
}
