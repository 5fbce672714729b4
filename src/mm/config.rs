//! # Configuração do Módulo de Memória
//!
//! Define constantes e layout de memória do MM (x86 32 bits, paginação de 2 níveis).

// =============================================================================
// CONSTANTES DE TAMANHO
// =============================================================================

/// Tamanho de uma página (4 KiB)
pub const PAGE_SIZE: usize = 4096;

/// Bits de offset dentro de uma página
pub const PAGE_SHIFT: u32 = 12;

/// Máscara para alinhar endereços a página
pub const PAGE_MASK: u32 = !(PAGE_SIZE as u32 - 1);

/// Entradas por page directory / page table
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes cobertos por uma entrada de page directory (4 MiB)
pub const PDE_SPAN: u32 = (ENTRIES_PER_TABLE * PAGE_SIZE) as u32;

// =============================================================================
// BUDDY ALLOCATOR
// =============================================================================

/// Ordem máxima do Buddy allocator (2^10 = 1024 páginas = 4 MiB)
pub const MAX_ORDER: usize = 10;

/// Número de listas livres por zona
pub const NR_ORDERS: usize = MAX_ORDER + 1;

// =============================================================================
// ZONAS FÍSICAS
// =============================================================================

/// Fim da zona DMA (ISA: 16 MiB)
pub const ZONE_DMA_END: u64 = 16 * 1024 * 1024;

/// Fim da zona Normal (lowmem: 896 MiB)
pub const ZONE_NORMAL_END: u64 = 896 * 1024 * 1024;

/// Limite de endereçamento físico sem PAE
pub const PHYS_LIMIT: u64 = 1 << 32;

// =============================================================================
// LAYOUT DE MEMÓRIA VIRTUAL
// =============================================================================

/// Início do higher-half do kernel. Tudo abaixo é espaço de usuário.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// Fim (exclusivo) do espaço de usuário
pub const USER_END: u32 = KERNEL_BASE;

/// Primeiro índice de page directory pertencente ao kernel (compartilhado)
pub const KERNEL_PDE_START: usize = (KERNEL_BASE / PDE_SPAN) as usize;

/// Folga abaixo de uma VMA grows-down em que um fault ainda expande a pilha
pub const STACK_GUARD_GAP: u32 = 64 * 1024;

// =============================================================================
// TLB
// =============================================================================

/// Acima deste número de páginas, invalidar a TLB inteira em vez de invlpg
pub const TLB_FLUSH_THRESHOLD: usize = 32;

// =============================================================================
// HELPERS
// =============================================================================

/// Número de páginas necessárias para `bytes`
#[inline]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Páginas em um bloco de ordem `order`
#[inline]
pub const fn order_pages(order: usize) -> usize {
    1 << order
}

/// Menor ordem cujo bloco cobre `pages` páginas
#[inline]
pub const fn order_for_pages(pages: usize) -> usize {
    let mut order = 0;
    while (1usize << order) < pages {
        order += 1;
    }
    order
}
