//! Testes de swap: evict, swap-in, falhas de I/O e reclaim.

use super::{memory, space_with, va};
use crate::mm::swap::SwapBackend;
use crate::mm::{Evicted, FaultError, FaultResult, MmError, Protection, Translation, VmaFlags};
use crate::sys::{Errno, Signal};
use alloc::vec;

const BASE: u32 = 0x2000_0000;

fn pattern() -> alloc::vec::Vec<u8> {
    (0..4096u32).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn evicted_page_comes_back_intact() {
    let mem = memory();
    let asid = space_with(&mem, BASE, BASE + 0x4000, Protection::RW);
    let data = pattern();
    mem.vmm.write_user(asid, va(BASE), &data).unwrap();
    let free = mem.pmm.free_frames();

    let Ok(Evicted::Swapped(entry)) = mem.vmm.evict(asid, va(BASE)) else {
        panic!("página deveria ir para o swap");
    };
    assert_eq!(mem.vmm.translate(asid, va(BASE)).unwrap(), Translation::Swapped(entry));
    assert_eq!(mem.pmm.free_frames(), free + 1);
    assert!(mem.swap.is_allocated(entry));
    assert_eq!(mem.vmm.space(asid).unwrap().rss(), 0);

    let mut back = vec![0u8; 4096];
    mem.vmm.read_user(asid, va(BASE), &mut back).unwrap();
    assert_eq!(back, data);
    assert!(!mem.swap.is_allocated(entry));
    assert!(matches!(
        mem.vmm.translate(asid, va(BASE)).unwrap(),
        Translation::Mapped { .. }
    ));
    assert_eq!(mem.vmm.swap().unwrap().counters(), (1, 1));
}

#[test]
fn write_error_restores_mapping() {
    let mem = memory();
    let asid = space_with(&mem, BASE, BASE + 0x1000, Protection::RW);
    mem.vmm.write_user(asid, va(BASE), b"keep").unwrap();
    let before = mem.vmm.translate(asid, va(BASE)).unwrap();

    mem.swap.set_fail_io(true);
    assert_eq!(mem.vmm.evict(asid, va(BASE)), Err(MmError::Io));
    mem.swap.set_fail_io(false);

    assert_eq!(mem.vmm.translate(asid, va(BASE)).unwrap(), before);
    assert_eq!(mem.swap.used(), 0);
    let mut seen = [0u8; 4];
    mem.vmm.read_user(asid, va(BASE), &mut seen).unwrap();
    assert_eq!(&seen, b"keep");
}

#[test]
fn read_error_raises_sigbus_and_keeps_entry() {
    let mem = memory();
    let asid = space_with(&mem, BASE, BASE + 0x1000, Protection::RW);
    mem.vmm.write_user(asid, va(BASE), b"later").unwrap();
    let Ok(Evicted::Swapped(entry)) = mem.vmm.evict(asid, va(BASE)) else {
        panic!("página deveria ir para o swap");
    };

    mem.swap.set_fail_io(true);
    assert_eq!(
        mem.vmm.fault(asid, va(BASE), FaultError::USER),
        FaultResult::Signal(Signal::SigBus)
    );
    let mut seen = [0u8; 5];
    assert_eq!(mem.vmm.read_user(asid, va(BASE), &mut seen), Err(Errno::EIO));
    assert_eq!(mem.vmm.translate(asid, va(BASE)).unwrap(), Translation::Swapped(entry));
    assert!(mem.vmm.swap().unwrap().cache().is_empty());

    mem.swap.set_fail_io(false);
    mem.vmm.read_user(asid, va(BASE), &mut seen).unwrap();
    assert_eq!(&seen, b"later");
}

#[test]
fn shared_and_locked_pages_stay_resident() {
    let mem = memory();
    let asid = space_with(&mem, BASE, BASE + 0x1000, Protection::RW);
    mem.vmm.write_user(asid, va(BASE), &[1]).unwrap();
    let child = mem.vmm.clone_space(asid).unwrap();
    // Frame com dois donos (COW)
    assert_eq!(mem.vmm.evict(asid, va(BASE)), Err(MmError::Busy));
    mem.vmm.destroy_space(child).unwrap();

    let locked = mem.vmm.create_space().unwrap();
    let vma = crate::mm::Vma::anonymous(BASE, BASE + 0x1000, Protection::RW).with_flags(VmaFlags::LOCKED);
    mem.vmm.map_region(locked, vma).unwrap();
    mem.vmm.write_user(locked, va(BASE), &[2]).unwrap();
    assert_eq!(mem.vmm.evict(locked, va(BASE)), Err(MmError::Busy));
    assert_eq!(mem.vmm.evict(locked, va(BASE + 0x2000)), Err(MmError::NotMapped));
}

#[test]
fn reclaim_ages_before_evicting() {
    let mem = memory();
    let asid = space_with(&mem, BASE, BASE + 0x8000, Protection::RW);
    for i in 0..8u32 {
        mem.vmm.write_user(asid, va(BASE + i * 0x1000), &[i as u8 + 1]).unwrap();
    }

    // Primeira passada só limpa ACCESSED
    assert_eq!(mem.vmm.reclaim(4), 0);
    assert_eq!(mem.vmm.space(asid).unwrap().rss(), 8);

    assert_eq!(mem.vmm.reclaim(4), 4);
    assert_eq!(mem.vmm.space(asid).unwrap().rss(), 4);
    assert_eq!(mem.swap.used(), 4);

    for i in 0..8u32 {
        let mut byte = [0u8];
        mem.vmm.read_user(asid, va(BASE + i * 0x1000), &mut byte).unwrap();
        assert_eq!(byte, [i as u8 + 1]);
    }
    assert_eq!(mem.swap.used(), 0);
    assert!(crate::mm::audit::audit(&mem.vmm).is_ok());
}

#[test]
fn unmap_frees_swap_entries() {
    let mem = memory();
    let asid = space_with(&mem, BASE, BASE + 0x2000, Protection::RW);
    mem.vmm.write_user(asid, va(BASE), &[9; 16]).unwrap();
    mem.vmm.evict(asid, va(BASE)).unwrap();
    assert_eq!(mem.swap.used(), 1);

    assert_eq!(mem.vmm.unmap_region(asid, super::range(BASE, 0x2000)), Ok(1));
    assert_eq!(mem.swap.used(), 0);
}
