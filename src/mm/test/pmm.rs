//! Testes do PMM (Physical Memory Manager)

use crate::arch::hosted::PhysArena;
use crate::klib::testkit::{RAM_BASE, RAM_SIZE};
use crate::mm::config::MAX_ORDER;
use crate::mm::pmm::{AllocFlags, FrameUsage, MemoryRegion, MemoryRegionType, Pmm, ZoneType};
use crate::mm::{MmError, PhysAddr, PhysRange};
use alloc::vec::Vec;

/// PMM sozinho (sem VMM, sem reclaim). O PMM vem primeiro na tupla para
/// ser destruído antes da arena.
fn pmm() -> (Pmm, PhysArena) {
    let arena = PhysArena::new(PhysAddr::new(RAM_BASE), RAM_SIZE);
    let regions = [MemoryRegion::new(RAM_BASE, RAM_SIZE as u64, MemoryRegionType::Usable)];
    let pmm = Pmm::new(arena.linear_map(), &regions, &[]).unwrap();
    (pmm, arena)
}

/// Quantos blocos de ordem máxima dá para tirar agora (e devolve todos).
fn max_blocks(pmm: &Pmm) -> usize {
    let mut blocks = Vec::new();
    while let Ok(pfn) = pmm.alloc(MAX_ORDER, ZoneType::Normal, AllocFlags::ATOMIC) {
        blocks.push(pfn);
    }
    let n = blocks.len();
    for pfn in blocks {
        pmm.free(pfn, MAX_ORDER);
    }
    n
}

#[test]
fn accounting_matches_memory_map() {
    let (pmm, _arena) = pmm();
    let stats = pmm.stats();
    let normal = stats.zones[ZoneType::Normal.index()];
    assert_eq!(normal.total, RAM_SIZE / 4096);
    assert_eq!(normal.free + normal.reserved + normal.allocated, normal.total);
    // A tabela de frames fica reservada dentro da própria RAM
    assert!(normal.reserved > 0);
    assert_eq!(stats.zones[ZoneType::Dma.index()].total, 0);
    assert!(pmm.audit().is_ok());
}

#[test]
fn blocks_are_naturally_aligned() {
    let (pmm, _arena) = pmm();
    for order in 0..=4 {
        let pfn = pmm.alloc(order, ZoneType::Normal, AllocFlags::empty()).unwrap();
        assert_eq!(pfn.as_u32() % (1 << order), 0, "ordem {order}");
        pmm.free(pfn, order);
    }
    assert!(pmm.audit().is_ok());
}

#[test]
fn freeing_coalesces_back_to_large_blocks() {
    let (pmm, _arena) = pmm();
    let before_free = pmm.free_frames();
    let before_blocks = max_blocks(&pmm);

    let small: Vec<_> = (0..37)
        .map(|_| pmm.alloc(0, ZoneType::Normal, AllocFlags::empty()).unwrap())
        .collect();
    assert_eq!(pmm.free_frames(), before_free - 37);
    for pfn in small.into_iter().rev() {
        pmm.free(pfn, 0);
    }

    assert_eq!(pmm.free_frames(), before_free);
    assert_eq!(max_blocks(&pmm), before_blocks);
    assert!(pmm.audit().is_ok());
}

#[test]
fn reserve_is_all_or_nothing() {
    let (pmm, _arena) = pmm();
    let pfn = pmm.alloc(0, ZoneType::Normal, AllocFlags::empty()).unwrap();
    let free = pmm.free_frames();

    let around = PhysRange::from_len(pfn.phys().as_u64() - 4096, 3 * 4096);
    assert_eq!(pmm.reserve(around), Err(MmError::AlreadyAllocated));
    assert_eq!(pmm.free_frames(), free);

    pmm.free(pfn, 0);
    assert!(pmm.reserve(around).is_ok());
    assert!(pmm.free_frames() <= free);
    assert!(!pmm.is_managed(pfn));
    assert!(pmm.audit().is_ok());
}

#[test]
#[should_panic(expected = "double free")]
fn double_free_is_fatal() {
    let (pmm, _arena) = pmm();
    let pfn = pmm.alloc(0, ZoneType::Normal, AllocFlags::empty()).unwrap();
    pmm.free(pfn, 0);
    pmm.free(pfn, 0);
}

#[test]
fn racing_double_free_releases_the_block_once() {
    let (pmm, _arena) = pmm();
    let before = pmm.free_frames();
    let pfn = pmm.alloc(1, ZoneType::Normal, AllocFlags::empty()).unwrap();
    let gate = std::sync::Barrier::new(2);

    let outcomes: Vec<bool> = std::thread::scope(|scope| {
        let racers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    gate.wait();
                    pmm.free(pfn, 1);
                })
            })
            .collect();
        racers.into_iter().map(|r| r.join().is_ok()).collect()
    });

    assert_eq!(outcomes.iter().filter(|&&ok| ok).count(), 1);
    assert_eq!(pmm.free_frames(), before);
    assert!(pmm.audit().is_ok());
}

#[test]
fn zone_fallback_only_goes_down() {
    let (pmm, _arena) = pmm();
    // Toda a RAM está em Normal: DMA não tem para onde cair
    assert_eq!(
        pmm.alloc(0, ZoneType::Dma, AllocFlags::empty()),
        Err(MmError::OutOfMemory)
    );
    let pfn = pmm.alloc(0, ZoneType::High, AllocFlags::empty()).unwrap();
    assert_eq!(ZoneType::of(pfn), ZoneType::Normal);
    pmm.free(pfn, 0);
}

#[test]
fn atomic_requests_may_dip_below_min() {
    let (pmm, _arena) = pmm();
    let mut held = Vec::new();
    while let Ok(pfn) = pmm.alloc_page(FrameUsage::Kernel, AllocFlags::empty()) {
        held.push(pfn);
    }
    let min = pmm.zone(ZoneType::Normal).watermarks().min;
    assert!(min > 0);
    assert_eq!(pmm.free_frames(), min);

    let pfn = pmm.alloc_page(FrameUsage::Kernel, AllocFlags::ATOMIC).unwrap();
    assert_eq!(pmm.free_frames(), min - 1);
    held.push(pfn);
    for pfn in held {
        pmm.free(pfn, 0);
    }
    assert!(pmm.audit().is_ok());
}

#[test]
fn references_free_on_last_put() {
    let (pmm, _arena) = pmm();
    let free = pmm.free_frames();
    let pfn = pmm.alloc_page(FrameUsage::Anon, AllocFlags::empty()).unwrap();
    pmm.get(pfn);
    assert_eq!(pmm.refcount(pfn), 2);
    assert!(!pmm.put(pfn));
    assert!(pmm.put(pfn));
    assert_eq!(pmm.free_frames(), free);
    assert!(!pmm.is_managed(pfn));
}

#[test]
fn zero_flag_clears_recycled_frames() {
    let (pmm, _arena) = pmm();
    let dirty = pmm.alloc_page(FrameUsage::Kernel, AllocFlags::empty()).unwrap();
    pmm.with_page_mut(dirty, |page| page.fill(0xAA));
    pmm.free(dirty, 0);

    let pfn = pmm.alloc_page(FrameUsage::Kernel, AllocFlags::ZERO).unwrap();
    assert!(pmm.with_page(pfn, |page| page.iter().all(|&b| b == 0)));
    pmm.free(pfn, 0);
}

#[test]
fn linear_map_round_trips() {
    let (pmm, _arena) = pmm();
    let pfn = pmm.alloc_page(FrameUsage::Kernel, AllocFlags::empty()).unwrap();
    let ptr = pmm.frame_to_virt(pfn).unwrap();
    assert_eq!(pmm.virt_to_frame(ptr), Some(pfn));
    assert!(pmm.pfn_to_frame(pfn).is_some());
    pmm.free(pfn, 0);
}
