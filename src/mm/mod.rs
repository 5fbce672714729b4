//! # Memory Management Subsystem (MM)
//!
//! Percepção que o núcleo tem da memória física e virtual.
//!
//! ## 🏗️ Arquitetura dos Módulos
//!
//! | Módulo   | Responsabilidade                                              |
//! |----------|---------------------------------------------------------------|
//! | `pmm`    | Frames físicos: buddy por zona, refcount, reservas.           |
//! | `vmm`    | Page tables de 2 níveis, map/unmap, fork, evict, TLB.         |
//! | `aspace` | Address spaces (VMAs) e o registro de handles `Asid`.         |
//! | `fault`  | Classificação e resolução de #PF, acesso a memória de usuário.|
//! | `swap`   | Backend de swap, swap cache, backend em RAM.                  |
//! | `cache`  | Page cache de arquivos.                                       |
//! | `audit`  | Verificação dos invariantes sobre o estado vivo.              |
//! | `heap`   | Heap do kernel bare-metal.                                    |
//!
//! ```text
//! PMM  ──▶ frames (page tables, páginas de usuário, page cache)
//!  ▲ │
//!  │ ▼ reclaim (sem lock de zona)
//! VMM  ──▶ swap backend / FileBacking (sempre sem lock do VMM)
//! ```
//!
//! ## Ordem de locks
//!
//! `Registry → AddressSpace → SwapCache → PageCache → SwapDevice → Zone`.
//! Alocações com lock de address space são `ATOMIC` (sem reclaim).

pub mod addr;
pub mod aspace;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod fault;
pub mod heap;
pub mod linear;
pub mod pmm;
pub mod swap;
pub mod vmm;

#[cfg(test)]
mod test;

pub use addr::{PhysAddr, PhysRange, Pfn, VirtAddr, VirtRange};
pub use aspace::{Asid, Protection, Sharing, Vma, VmaBacking, VmaFlags};
pub use error::{MmError, MmResult};
pub use fault::{FaultError, FaultResult};
pub use pmm::{AllocFlags, FrameUsage, Pmm, ZoneType};
pub use vmm::{Evicted, Translation, Vmm};
