//! # Buddy Allocator
//!
//! Listas livres por ordem (0..=MAX_ORDER) encadeadas pelos próprios
//! descritores de frame (índices densos, sem ponteiros).
//!
//! - `alloc(k)`: divide o menor bloco livre de ordem ≥ k e devolve a metade
//!   de endereço mais baixo.
//! - `free(k)`: junta com o buddy enquanto ele estiver livre com a mesma ordem.
//!
//! Tudo aqui roda com o lock da zona segurado; nada mais é adquirido.

use super::frame::{FrameState, FrameTable, FrameUsage, NIL};
use crate::mm::addr::Pfn;
use crate::mm::config::{MAX_ORDER, NR_ORDERS};
use core::sync::atomic::Ordering;

/// Faixa de PFNs de uma zona `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PfnSpan {
    pub start: Pfn,
    pub end: Pfn,
}

impl PfnSpan {
    pub fn contains(&self, pfn: Pfn) -> bool {
        pfn >= self.start && pfn < self.end
    }

    pub fn len(&self) -> usize {
        self.end.as_usize().saturating_sub(self.start.as_usize())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Listas livres de uma zona
pub struct FreeArea {
    heads: [u32; NR_ORDERS],
    blocks: [usize; NR_ORDERS],
}

impl FreeArea {
    pub const fn new() -> Self {
        Self {
            heads: [NIL; NR_ORDERS],
            blocks: [0; NR_ORDERS],
        }
    }

    /// Blocos livres por ordem.
    pub fn blocks(&self, order: usize) -> usize {
        self.blocks[order]
    }

    /// Frames livres somando todas as listas.
    pub fn free_frames(&self) -> usize {
        (0..NR_ORDERS).map(|k| self.blocks[k] << k).sum()
    }

    fn push(&mut self, table: &FrameTable, pfn: Pfn, order: usize) {
        let desc = table.desc(pfn);
        let head = self.heads[order];
        desc.set_order(Some(order));
        desc.next.store(head, Ordering::Relaxed);
        desc.prev.store(NIL, Ordering::Relaxed);
        if head != NIL {
            table.desc(Pfn::new(head)).prev.store(pfn.as_u32(), Ordering::Relaxed);
        }
        self.heads[order] = pfn.as_u32();
        self.blocks[order] += 1;
    }

    fn remove(&mut self, table: &FrameTable, pfn: Pfn, order: usize) {
        let desc = table.desc(pfn);
        let next = desc.next.swap(NIL, Ordering::Relaxed);
        let prev = desc.prev.swap(NIL, Ordering::Relaxed);
        if prev == NIL {
            self.heads[order] = next;
        } else {
            table.desc(Pfn::new(prev)).next.store(next, Ordering::Relaxed);
        }
        if next != NIL {
            table.desc(Pfn::new(next)).prev.store(prev, Ordering::Relaxed);
        }
        self.blocks[order] -= 1;
    }

    fn pop(&mut self, table: &FrameTable, order: usize) -> Option<Pfn> {
        let head = self.heads[order];
        if head == NIL {
            return None;
        }
        let pfn = Pfn::new(head);
        self.remove(table, pfn, order);
        Some(pfn)
    }

    /// Aloca um bloco de `order`. Os frames saem marcados `Allocated` e a
    /// cabeça guarda a ordem.
    pub fn alloc(&mut self, table: &FrameTable, order: usize) -> Option<Pfn> {
        let found = (order..NR_ORDERS).find(|&k| self.heads[k] != NIL)?;
        let pfn = self.pop(table, found)?;

        let mut k = found;
        while k > order {
            k -= 1;
            // Metade alta volta para a lista; seguimos com a baixa
            self.push(table, pfn.add(1 << k), k);
        }

        for i in 0..(1u32 << order) {
            let desc = table.desc(pfn.add(i));
            desc.set_state(FrameState::Allocated);
            desc.set_order(None);
        }
        table.desc(pfn).set_order(Some(order));
        Some(pfn)
    }

    /// Devolve um bloco, juntando com os buddies livres.
    pub fn free(&mut self, table: &FrameTable, span: PfnSpan, pfn: Pfn, order: usize) {
        for i in 0..(1u32 << order) {
            let desc = table.desc(pfn.add(i));
            desc.set_state(FrameState::Free);
            desc.set_order(None);
            desc.set_refcount(0);
            desc.set_usage(FrameUsage::None);
        }

        let mut pfn = pfn;
        let mut order = order;
        while order < MAX_ORDER {
            let buddy = Pfn::new(pfn.as_u32() ^ (1 << order));
            if !span.contains(buddy) {
                break;
            }
            let Some(desc) = table.get(buddy) else { break };
            if desc.state() != FrameState::Free || desc.order() != Some(order) {
                break;
            }
            self.remove(table, buddy, order);
            desc.set_order(None);
            pfn = pfn.min(buddy);
            order += 1;
        }
        self.push(table, pfn, order);
    }

    /// Tira um único frame livre de dentro do bloco que o contém.
    /// `false` se o frame não está livre.
    pub fn take(&mut self, table: &FrameTable, pfn: Pfn) -> bool {
        let Some((mut head, mut order)) = self.containing_block(table, pfn) else {
            return false;
        };
        self.remove(table, head, order);

        while order > 0 {
            order -= 1;
            let upper = head.add(1 << order);
            if pfn >= upper {
                self.push(table, head, order);
                head = upper;
            } else {
                self.push(table, upper, order);
            }
        }
        table.desc(pfn).set_order(None);
        true
    }

    fn containing_block(&self, table: &FrameTable, pfn: Pfn) -> Option<(Pfn, usize)> {
        (0..NR_ORDERS).find_map(|k| {
            let head = Pfn::new(pfn.as_u32() & !((1u32 << k) - 1));
            let desc = table.get(head)?;
            (desc.state() == FrameState::Free && desc.order() == Some(k)).then_some((head, k))
        })
    }

    /// Percorre as listas conferindo estado e ordem das cabeças.
    /// Devolve o total de frames encontrados ou o primeiro PFN inconsistente.
    pub fn walk_check(&self, table: &FrameTable, span: PfnSpan) -> Result<usize, Pfn> {
        let mut total = 0;
        for order in 0..NR_ORDERS {
            let mut cursor = self.heads[order];
            let mut seen = 0;
            while cursor != NIL {
                let pfn = Pfn::new(cursor);
                let desc = table.get(pfn).ok_or(pfn)?;
                if !span.contains(pfn)
                    || desc.state() != FrameState::Free
                    || desc.order() != Some(order)
                    || seen > self.blocks[order]
                {
                    return Err(pfn);
                }
                seen += 1;
                total += 1 << order;
                cursor = desc.next.load(Ordering::Relaxed);
            }
            if seen != self.blocks[order] {
                return Err(Pfn::new(self.heads[order]));
            }
        }
        Ok(total)
    }
}

impl Default for FreeArea {
    fn default() -> Self {
        Self::new()
    }
}
