//! # Page Cache

use crate::mm::addr::Pfn;
use crate::mm::error::MmResult;
use crate::mm::pmm::{AllocFlags, FrameUsage, Pmm};
use crate::sync::{LockRank, Spinlock};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

pub type Inode = u64;
pub type PageIndex = u32;

/// Quem sabe ler o conteúdo de um arquivo (o sistema de arquivos).
pub trait FileBacking: Send + Sync {
    /// Preenche `page` (uma página inteira) com a página `index` do inode.
    /// Além do fim do arquivo, zeros.
    fn read_page(&self, inode: Inode, index: PageIndex, page: &mut [u8]) -> MmResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCacheStats {
    pub cached_pages: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct PageCache {
    pages: Spinlock<BTreeMap<(Inode, PageIndex), Pfn>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            pages: Spinlock::new(LockRank::PageCache, BTreeMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Frame da página `(inode, index)` com uma referência nova para o
    /// chamador. Num miss a leitura roda sem o lock do cache; se outro CPU
    /// inseriu a mesma página nesse meio tempo, a cópia dele vence.
    pub fn get(
        &self,
        pmm: &Pmm,
        backing: &dyn FileBacking,
        inode: Inode,
        index: PageIndex,
    ) -> MmResult<Pfn> {
        if let Some(pfn) = self.lookup_get(pmm, inode, index) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(pfn);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let pfn = pmm.alloc_page(FrameUsage::PageCache, AllocFlags::empty())?;
        if let Err(err) = pmm.with_page_mut(pfn, |page| backing.read_page(inode, index, page)) {
            pmm.put(pfn);
            crate::kwarn!("(PageCache) Falha de leitura, inode=", inode, " idx=", index as u64);
            return Err(err);
        }

        let winner = {
            let mut pages = self.pages.lock_irqsave();
            match pages.get(&(inode, index)) {
                Some(&existing) => {
                    pmm.get(existing);
                    Some(existing)
                }
                None => {
                    // Referência do cache + referência do chamador
                    pmm.get(pfn);
                    pages.insert((inode, index), pfn);
                    None
                }
            }
        };

        match winner {
            Some(existing) => {
                pmm.put(pfn);
                Ok(existing)
            }
            None => Ok(pfn),
        }
    }

    fn lookup_get(&self, pmm: &Pmm, inode: Inode, index: PageIndex) -> Option<Pfn> {
        let pages = self.pages.lock_irqsave();
        let pfn = *pages.get(&(inode, index))?;
        pmm.get(pfn);
        Some(pfn)
    }

    /// Frame em cache, sem tomar referência.
    pub fn peek(&self, inode: Inode, index: PageIndex) -> Option<Pfn> {
        self.pages.lock_irqsave().get(&(inode, index)).copied()
    }

    /// Descarta até `target` páginas que só o cache referencia.
    pub fn shrink(&self, pmm: &Pmm, target: usize) -> usize {
        let victims: Vec<Pfn> = {
            let mut pages = self.pages.lock_irqsave();
            let keys: Vec<_> = pages
                .iter()
                .filter(|(_, &pfn)| pmm.refcount(pfn) == 1)
                .map(|(&key, _)| key)
                .take(target)
                .collect();
            keys.iter().filter_map(|key| pages.remove(key)).collect()
        };

        // Um fault pode ter tomado referência depois do filtro; o put só
        // libera o frame se o cache era mesmo o último dono.
        for &pfn in &victims {
            pmm.put(pfn);
        }
        self.evictions.fetch_add(victims.len() as u64, Ordering::Relaxed);
        if !victims.is_empty() {
            crate::kdebug!("(PageCache) Shrink, páginas=", victims.len() as u64);
        }
        victims.len()
    }

    /// Remove todas as páginas de um inode (truncate / inode liberado).
    pub fn invalidate(&self, pmm: &Pmm, inode: Inode) -> usize {
        let victims: Vec<Pfn> = {
            let mut pages = self.pages.lock_irqsave();
            let keys: Vec<_> = pages
                .range((inode, 0)..=(inode, PageIndex::MAX))
                .map(|(&key, _)| key)
                .collect();
            keys.iter().filter_map(|key| pages.remove(key)).collect()
        };
        for &pfn in &victims {
            pmm.put(pfn);
        }
        victims.len()
    }

    pub fn contains_frame(&self, pfn: Pfn) -> bool {
        self.pages.lock_irqsave().values().any(|&p| p == pfn)
    }

    /// Quantas entradas apontam para o frame (deve ser no máximo 1).
    pub fn entries_for(&self, pfn: Pfn) -> usize {
        self.pages.lock_irqsave().values().filter(|&&p| p == pfn).count()
    }

    pub fn len(&self) -> usize {
        self.pages.lock_irqsave().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PageCacheStats {
        PageCacheStats {
            cached_pages: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}
