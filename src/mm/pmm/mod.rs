//! # PMM - Physical Memory Manager
//!
//! Gerencia os frames físicos de 4 KiB da faixa coberta pelo mapa linear.
//!
//! ## 🏗️ Arquitetura
//!
//! | Peça        | Papel                                                        |
//! |-------------|--------------------------------------------------------------|
//! | `frame`     | Tabela densa de descritores (estado, tag, refcount, links)   |
//! | `buddy`     | Listas livres por ordem, split/coalesce                      |
//! | `zones`     | DMA / Normal / High, contadores e watermarks                 |
//! | `region`    | Tipos do memory map do bootloader                            |
//!
//! ## Regras
//!
//! - O lock de uma zona cobre split/coalesce e nada mais é adquirido sob ele.
//! - O hook de reclaim roda sem nenhum lock de zona. Pedidos `ATOMIC` nunca
//!   fazem reclaim e podem furar o watermark `min`.
//! - Frames fora da faixa gerenciada (MMIO) nunca têm refcount.

pub mod buddy;
pub mod frame;
pub mod region;
pub mod zones;

pub use frame::{FrameDesc, FrameState, FrameTable, FrameUsage};
pub use region::{MemoryRegion, MemoryRegionType};
pub use zones::{Watermarks, Zone, ZoneStats, ZoneType};

use crate::arch::{Cpu, CpuOps};
use crate::mm::addr::{PhysAddr, PhysRange, Pfn};
use crate::mm::config::{MAX_ORDER, PAGE_SIZE};
use crate::mm::error::{MmError, MmResult};
use crate::mm::linear::LinearMap;
use alloc::sync::Weak;
use spin::Once;
use zones::Counters;

bitflags::bitflags! {
    /// Flags de alocação
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        /// Zera o bloco antes de entregar
        const ZERO = 1 << 0;
        /// Contexto que não pode esperar: sem reclaim, pode furar `min`
        const ATOMIC = 1 << 1;
    }
}

/// Quem sabe liberar memória sob pressão (o VMM).
pub trait Reclaim: Send + Sync {
    /// Tenta liberar ao menos `target` frames; devolve quantos liberou.
    fn reclaim(&self, target: usize) -> usize;
}

/// Lote mínimo pedido ao reclaim.
const RECLAIM_BATCH: usize = 32;

/// Retrato dos contadores de todas as zonas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmmStats {
    pub zones: [ZoneStats; 3],
}

impl PmmStats {
    pub fn free(&self) -> usize {
        self.zones.iter().map(|z| z.free).sum()
    }

    pub fn total(&self) -> usize {
        self.zones.iter().map(|z| z.total).sum()
    }

    pub fn allocated(&self) -> usize {
        self.zones.iter().map(|z| z.allocated).sum()
    }
}

pub struct Pmm {
    linear: LinearMap,
    table: FrameTable,
    table_range: PhysRange,
    zones: [Zone; 3],
    reclaim: Once<Weak<dyn Reclaim>>,
}

impl Pmm {
    /// Constrói o PMM a partir do memory map.
    ///
    /// A tabela de frames vai para a primeira região utilizável grande o
    /// bastante que não colida com `early_reserved` (kernel, módulos...).
    /// Todas as regiões utilizáveis são liberadas e depois `early_reserved`
    /// e a própria tabela são reservadas.
    pub fn new(
        linear: LinearMap,
        regions: &[MemoryRegion],
        early_reserved: &[PhysRange],
    ) -> MmResult<Self> {
        let clip = |r: &MemoryRegion| -> Option<(Pfn, Pfn)> {
            let start = r.start().as_u64().max(linear.phys_start().as_u64());
            let end = r.end().as_u64().min(linear.phys_end().as_u64());
            let (first, count) = PhysRange::from_len(start, end.saturating_sub(start)).inner_frames();
            (start < end && count > 0).then(|| (first, first.add(count)))
        };

        let usable = || regions.iter().filter(|r| r.is_usable()).filter_map(clip);
        let lo = usable().map(|(s, _)| s).min().ok_or(MmError::OutOfMemory)?;
        let hi = usable().map(|(_, e)| e).max().ok_or(MmError::OutOfMemory)?;
        let frames = hi.as_usize() - lo.as_usize();
        let table_bytes = FrameTable::bytes_for(frames).next_multiple_of(PAGE_SIZE) as u64;

        let table_start = usable()
            .find_map(|(s, e)| place(s.phys().as_u64(), e.phys().as_u64(), table_bytes, early_reserved))
            .ok_or(MmError::OutOfMemory)?;
        let table_range = PhysRange::from_len(table_start, table_bytes);

        // SAFETY: a faixa é RAM utilizável coberta pelo mapa linear, fora de
        // qualquer reserva, e fica reservada para sempre logo abaixo.
        let table = unsafe { FrameTable::init_at(linear.phys_to_virt(PhysAddr::new(table_start)), lo, frames) };

        let pmm = Self {
            linear,
            table,
            table_range,
            zones: ZoneType::ALL.map(|kind| Zone::new(kind, lo, hi)),
            reclaim: Once::new(),
        };

        for (start, end) in usable() {
            pmm.free_range(PhysRange::new(start.phys(), end.phys()))?;
        }
        pmm.reserve(table_range)?;
        for range in early_reserved {
            pmm.reserve(*range)?;
        }

        crate::kinfo!("(PMM) Frames gerenciados: ", pmm.total_frames() as u64);
        crate::kinfo!("(PMM) Frames livres: ", pmm.free_frames() as u64);
        Ok(pmm)
    }

    pub fn linear(&self) -> &LinearMap {
        &self.linear
    }

    pub fn frame_table(&self) -> &FrameTable {
        &self.table
    }

    /// Faixa física ocupada pela tabela de frames.
    pub fn table_range(&self) -> PhysRange {
        self.table_range
    }

    pub fn zone(&self, kind: ZoneType) -> &Zone {
        &self.zones[kind.index()]
    }

    pub fn zones(&self) -> &[Zone; 3] {
        &self.zones
    }

    fn zone_of(&self, pfn: Pfn) -> &Zone {
        self.zone(ZoneType::of(pfn))
    }

    /// Registra o hook de reclaim (uma vez, no boot).
    pub fn set_reclaim(&self, reclaim: Weak<dyn Reclaim>) {
        self.reclaim.call_once(|| reclaim);
    }

    // =========================================================================
    // RESERVAS (boot)
    // =========================================================================

    /// Marca a faixa como usada. Tudo ou nada: falha se algum frame já
    /// está alocado.
    pub fn reserve(&self, range: PhysRange) -> MmResult<()> {
        let (first, count) = range.outer_frames();
        let (first, end) = self.clip(first, count);
        if first >= end {
            return Ok(());
        }

        let flags = Cpu::irq_disable_save();
        let mut areas = self.zones.each_ref().map(Zone::lock_nested);
        for pfn in pfns(first, end) {
            if self.table.desc(pfn).state() == FrameState::Allocated {
                drop(areas);
                Cpu::irq_restore(flags);
                return Err(MmError::AlreadyAllocated);
            }
        }

        for pfn in pfns(first, end) {
            let desc = self.table.desc(pfn);
            let zone = self.zone_of(pfn);
            let c = &zone.counters;
            match desc.state() {
                FrameState::Free => {
                    if !areas[zone.kind().index()].take(&self.table, pfn) {
                        panic!("PMM: frame livre fora das listas");
                    }
                    Counters::sub(&c.free, 1);
                    Counters::add(&c.reserved, 1);
                }
                FrameState::Absent => {
                    Counters::add(&c.total, 1);
                    Counters::add(&c.reserved, 1);
                }
                FrameState::Reserved | FrameState::Allocated => continue,
            }
            desc.set_order(None);
            desc.set_state(FrameState::Reserved);
        }
        drop(areas);
        Cpu::irq_restore(flags);
        self.zones.iter().for_each(Zone::update_watermarks);
        Ok(())
    }

    /// Libera uma faixa (ausente ou reservada) para o alocador.
    pub fn free_range(&self, range: PhysRange) -> MmResult<()> {
        let (first, count) = range.inner_frames();
        let (first, end) = self.clip(first, count);
        if first >= end {
            return Ok(());
        }

        let flags = Cpu::irq_disable_save();
        let mut areas = self.zones.each_ref().map(Zone::lock_nested);
        let conflict = pfns(first, end).find_map(|pfn| match self.table.desc(pfn).state() {
            FrameState::Allocated => Some(MmError::AlreadyAllocated),
            FrameState::Free => Some(MmError::InvalidParameter),
            FrameState::Absent | FrameState::Reserved => None,
        });
        if let Some(err) = conflict {
            drop(areas);
            Cpu::irq_restore(flags);
            return Err(err);
        }

        for pfn in pfns(first, end) {
            let c = &self.zone_of(pfn).counters;
            if self.table.desc(pfn).state() == FrameState::Absent {
                Counters::add(&c.total, 1);
            } else {
                Counters::sub(&c.reserved, 1);
            }
        }

        // Blocos alinhados o maior possível, sem cruzar zonas
        let mut pfn = first;
        while pfn < end {
            let zone = self.zone_of(pfn);
            let limit = end.min(zone.span().end);
            let mut order = MAX_ORDER;
            while order > 0 && (pfn.as_u32() % (1 << order) != 0 || pfn.add(1 << order) > limit) {
                order -= 1;
            }
            areas[zone.kind().index()].free(&self.table, zone.span(), pfn, order);
            Counters::add(&zone.counters.free, 1 << order);
            pfn = pfn.add(1 << order);
        }
        drop(areas);
        Cpu::irq_restore(flags);
        self.zones.iter().for_each(Zone::update_watermarks);
        Ok(())
    }

    fn clip(&self, first: Pfn, count: u32) -> (Pfn, Pfn) {
        let end = first.add(count).min(self.table.end());
        (first.max(self.table.base()), end)
    }

    // =========================================================================
    // ALOCAÇÃO
    // =========================================================================

    /// Aloca `2^order` frames para o kernel.
    pub fn alloc(&self, order: usize, zone: ZoneType, flags: AllocFlags) -> MmResult<Pfn> {
        self.alloc_tagged(order, zone, flags, FrameUsage::Kernel)
    }

    /// Atalho: uma página com a tag dada, zona Normal (ou abaixo).
    pub fn alloc_page(&self, usage: FrameUsage, flags: AllocFlags) -> MmResult<Pfn> {
        self.alloc_tagged(0, ZoneType::Normal, flags, usage)
    }

    pub fn alloc_tagged(
        &self,
        order: usize,
        zone: ZoneType,
        flags: AllocFlags,
        usage: FrameUsage,
    ) -> MmResult<Pfn> {
        if order > MAX_ORDER {
            return Err(MmError::InvalidSize);
        }
        let atomic = flags.contains(AllocFlags::ATOMIC);
        let pages = 1usize << order;

        for attempt in 0..2 {
            if let Some(pfn) = self.try_alloc(order, zone, atomic) {
                self.finish_alloc(pfn, order, flags, usage);
                return Ok(pfn);
            }
            if atomic || attempt == 1 {
                break;
            }
            // Sem lock de zona: o reclaim pode liberar frames
            let Some(reclaim) = self.reclaim.get().and_then(Weak::upgrade) else {
                break;
            };
            if reclaim.reclaim(pages.max(RECLAIM_BATCH)) == 0 {
                break;
            }
        }

        crate::kwarn!("(PMM) OOM, ordem=", order as u64);
        Err(MmError::OutOfMemory)
    }

    fn try_alloc(&self, order: usize, hint: ZoneType, atomic: bool) -> Option<Pfn> {
        for &kind in hint.fallback() {
            let zone = self.zone(kind);
            if zone.span().is_empty() {
                continue;
            }
            let mut area = zone.lock();
            if !zone.allows(1 << order, atomic) {
                continue;
            }
            if let Some(pfn) = area.alloc(&self.table, order) {
                Counters::sub(&zone.counters.free, 1 << order);
                Counters::add(&zone.counters.allocated, 1 << order);
                return Some(pfn);
            }
        }
        None
    }

    fn finish_alloc(&self, pfn: Pfn, order: usize, flags: AllocFlags, usage: FrameUsage) {
        let desc = self.table.desc(pfn);
        desc.set_refcount(1);
        desc.set_usage(usage);
        if usage.is_user() {
            desc.swap_active(true);
            Counters::add(&self.zone_of(pfn).counters.active, 1);
        }
        if flags.contains(AllocFlags::ZERO) {
            for i in 0..(1u32 << order) {
                self.zero_frame(pfn.add(i));
            }
        }
    }

    /// Devolve um bloco. A ordem tem que ser a da alocação; liberar um
    /// frame que não está alocado é fatal.
    pub fn free(&self, pfn: Pfn, order: usize) {
        let Some(desc) = self.table.get(pfn) else {
            panic!("PMM: free de frame não gerenciado");
        };
        let zone = self.zone_of(pfn);
        // Estado checado e liberado sob o mesmo lock da zona
        let mut area = zone.lock();
        if desc.state() != FrameState::Allocated {
            drop(area);
            panic!("PMM: double free");
        }
        if desc.order() != Some(order) {
            drop(area);
            panic!("PMM: ordem do free não corresponde à alocação");
        }

        if desc.usage().is_user() {
            let counter = if desc.swap_active(false) {
                &zone.counters.active
            } else {
                &zone.counters.inactive
            };
            Counters::sub(counter, 1);
        }
        area.free(&self.table, zone.span(), pfn, order);
        Counters::add(&zone.counters.free, 1 << order);
        Counters::sub(&zone.counters.allocated, 1 << order);
    }

    // =========================================================================
    // REFERÊNCIAS
    // =========================================================================

    /// Frame alocado dentro da faixa gerenciada?
    pub fn is_managed(&self, pfn: Pfn) -> bool {
        self.table
            .get(pfn)
            .is_some_and(|d| d.state() == FrameState::Allocated)
    }

    /// +1 referência. Frames não gerenciados são ignorados.
    pub fn get(&self, pfn: Pfn) {
        if let Some(desc) = self.table.get(pfn) {
            if desc.state() == FrameState::Allocated {
                desc.inc_ref();
            }
        }
    }

    /// -1 referência; libera ao chegar a zero. Devolve `true` se liberou.
    pub fn put(&self, pfn: Pfn) -> bool {
        let Some(desc) = self.table.get(pfn) else {
            return false;
        };
        if desc.state() != FrameState::Allocated {
            return false;
        }
        if desc.dec_ref() > 0 {
            return false;
        }
        let order = desc.order().unwrap_or(0);
        self.free(pfn, order);
        true
    }

    pub fn refcount(&self, pfn: Pfn) -> u32 {
        self.table.get(pfn).map_or(0, FrameDesc::refcount)
    }

    pub fn usage(&self, pfn: Pfn) -> FrameUsage {
        self.table.get(pfn).map_or(FrameUsage::None, FrameDesc::usage)
    }

    /// Move uma página de usuário entre as contagens active/inactive.
    pub fn set_active(&self, pfn: Pfn, active: bool) {
        let Some(desc) = self.table.get(pfn) else { return };
        if desc.state() != FrameState::Allocated || !desc.usage().is_user() {
            return;
        }
        if desc.swap_active(active) == active {
            return;
        }
        let c = &self.zone_of(pfn).counters;
        if active {
            Counters::sub(&c.inactive, 1);
            Counters::add(&c.active, 1);
        } else {
            Counters::sub(&c.active, 1);
            Counters::add(&c.inactive, 1);
        }
    }

    // =========================================================================
    // TRADUÇÃO E CONTEÚDO
    // =========================================================================

    pub fn pfn_to_frame(&self, pfn: Pfn) -> Option<&FrameDesc> {
        self.table.get(pfn)
    }

    pub fn frame_to_virt(&self, pfn: Pfn) -> Option<*mut u8> {
        self.linear.covers_frame(pfn).then(|| self.linear.frame_ptr(pfn))
    }

    pub fn virt_to_frame(&self, virt: *const u8) -> Option<Pfn> {
        self.linear.virt_to_phys(virt).map(PhysAddr::pfn)
    }

    /// Ponteiro para o frame; fora do mapa linear é violação de invariante.
    fn page_ptr(&self, pfn: Pfn) -> *mut u8 {
        match self.frame_to_virt(pfn) {
            Some(ptr) => ptr,
            None => panic!("PMM: frame fora do mapa linear"),
        }
    }

    pub fn zero_frame(&self, pfn: Pfn) {
        // SAFETY: página inteira dentro do mapa linear
        unsafe { core::ptr::write_bytes(self.page_ptr(pfn), 0, PAGE_SIZE) };
    }

    pub fn copy_frame(&self, dst: Pfn, src: Pfn) {
        // SAFETY: frames distintos, ambos dentro do mapa linear
        unsafe { core::ptr::copy_nonoverlapping(self.page_ptr(src), self.page_ptr(dst), PAGE_SIZE) };
    }

    /// Lê `buf.len()` bytes a partir de `offset` dentro do frame.
    pub fn read_bytes(&self, pfn: Pfn, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= PAGE_SIZE);
        // SAFETY: intervalo checado dentro da página
        unsafe { core::ptr::copy_nonoverlapping(self.page_ptr(pfn).add(offset), buf.as_mut_ptr(), buf.len()) };
    }

    pub fn write_bytes(&self, pfn: Pfn, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= PAGE_SIZE);
        // SAFETY: intervalo checado dentro da página
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), self.page_ptr(pfn).add(offset), data.len()) };
    }

    /// Empresta o conteúdo da página.
    pub fn with_page<R>(&self, pfn: Pfn, f: impl FnOnce(&[u8]) -> R) -> R {
        // SAFETY: a página pertence ao chamador (referência segurada)
        f(unsafe { core::slice::from_raw_parts(self.page_ptr(pfn), PAGE_SIZE) })
    }

    pub fn with_page_mut<R>(&self, pfn: Pfn, f: impl FnOnce(&mut [u8]) -> R) -> R {
        // SAFETY: a página pertence ao chamador e ninguém mais a mapeia
        f(unsafe { core::slice::from_raw_parts_mut(self.page_ptr(pfn), PAGE_SIZE) })
    }

    // =========================================================================
    // CONTABILIDADE
    // =========================================================================

    pub fn free_frames(&self) -> usize {
        self.zones.iter().map(Zone::free_frames).sum()
    }

    pub fn total_frames(&self) -> usize {
        self.zones.iter().map(Zone::total_frames).sum()
    }

    pub fn stats(&self) -> PmmStats {
        PmmStats {
            zones: self.zones.each_ref().map(Zone::stats),
        }
    }

    /// Confere todas as zonas; devolve o início da primeira inconsistente.
    pub fn audit(&self) -> Result<(), Pfn> {
        self.zones
            .iter()
            .filter(|zone| !zone.span().is_empty())
            .try_for_each(|zone| self.check_zone(zone))
    }

    /// Confere contadores contra a tabela de frames e as listas livres.
    pub(crate) fn check_zone(&self, zone: &Zone) -> Result<(), Pfn> {
        let area = zone.lock();
        let listed = area.walk_check(&self.table, zone.span())?;

        let (mut free, mut reserved, mut allocated) = (0, 0, 0);
        for pfn in pfns(zone.span().start, zone.span().end) {
            match self.table.desc(pfn).state() {
                FrameState::Free => free += 1,
                FrameState::Reserved => reserved += 1,
                FrameState::Allocated => allocated += 1,
                FrameState::Absent => {}
            }
        }
        let s = zone.stats();
        let consistent = listed == free
            && s.free == free
            && s.reserved == reserved
            && s.allocated == allocated
            && free + reserved + allocated == s.total;
        if consistent {
            Ok(())
        } else {
            Err(zone.span().start)
        }
    }
}

/// PFNs de `[first, end)`.
fn pfns(first: Pfn, end: Pfn) -> impl Iterator<Item = Pfn> {
    (first.as_u32()..end.as_u32()).map(Pfn::new)
}

/// Primeiro endereço alinhado em `[start, end)` com `len` bytes livres de
/// qualquer faixa de `avoid`.
fn place(start: u64, end: u64, len: u64, avoid: &[PhysRange]) -> Option<u64> {
    let mut candidate = start.next_multiple_of(PAGE_SIZE as u64);
    'retry: while candidate + len <= end {
        for r in avoid {
            let (s, e) = (r.start.as_u64(), r.end.as_u64());
            if candidate < e && s < candidate + len {
                candidate = e.next_multiple_of(PAGE_SIZE as u64);
                continue 'retry;
            }
        }
        return Some(candidate);
    }
    None
}
