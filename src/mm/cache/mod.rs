//! # Page Cache
//!
//! Cache de páginas de arquivos em memória RAM.
//!
//! ## Visão Geral
//!
//! O Page Cache fica entre o demand pager e o armazenamento. Um fault em
//! VMA de arquivo pede a página `(inode, índice)`; o cache devolve o frame
//! que já tem ou lê pelo [`FileBacking`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     VMM (fault / evict)                      │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │ get / shrink
//! ┌───────────────────────────▼─────────────────────────────────┐
//! │                      PAGE CACHE                              │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                   │
//! │  │ (ino, 0) │  │ (ino, 1) │  │ (ino, N) │  ...              │
//! │  │ ref=1    │  │ ref=3    │  │ ref=1    │                   │
//! │  └──────────┘  └──────────┘  └──────────┘                   │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │ read_page
//! ┌───────────────────────────▼─────────────────────────────────┐
//! │                  FileBacking (colaborador)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Características
//!
//! - **Uma referência por página**: o cache segura uma; cada mapeamento, outra
//! - **Shrink**: páginas com refcount 1 (não mapeadas) são descartáveis
//! - **Somente leitura**: mapeamentos privados fazem COW, o cache nunca fica sujo

pub mod pagecache;

pub use pagecache::{FileBacking, PageCache, PageCacheStats};
