//! Testes do VMM: demand-zero, map/unmap, COW e fork, mprotect, pilha.

use super::{memory, range, space_with, va};
use crate::mm::config::STACK_GUARD_GAP;
use crate::mm::pmm::{AllocFlags, FrameUsage};
use crate::mm::swap::SwapBackend;
use crate::mm::vmm::PteFlags;
use crate::mm::{FaultError, FaultResult, MmError, Protection, Translation, Vma, VmaFlags};
use crate::sys::{Errno, Signal};

fn mapped(t: Translation) -> (crate::mm::Pfn, PteFlags) {
    match t {
        Translation::Mapped { pfn, flags } => (pfn, flags),
        other => panic!("esperava página presente, veio {other:?}"),
    }
}

#[test]
fn first_touch_allocates_zeroed_page() {
    let mem = memory();
    let asid = space_with(&mem, 0x4000, 0x8000, Protection::RW);
    let before = mem.pmm.free_frames();

    let result = mem.vmm.fault(asid, va(0x5000), FaultError::USER);
    assert_eq!(result, FaultResult::Handled);

    // Uma page table nova + o frame da página
    assert_eq!(mem.pmm.free_frames(), before - 2);
    let (pfn, flags) = mapped(mem.vmm.translate(asid, va(0x5000)).unwrap());
    assert!(flags.contains(PteFlags::WRITABLE | PteFlags::USER));
    assert_eq!(mem.pmm.usage(pfn), FrameUsage::Anon);
    assert_eq!(mem.vmm.space(asid).unwrap().rss(), 1);

    let mut buf = [0xFFu8; 64];
    mem.vmm.read_user(asid, va(0x5000), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));

    // Vizinha dentro da VMA continua sem frame
    assert_eq!(mem.vmm.translate(asid, va(0x6000)).unwrap(), Translation::NotMapped);
}

#[test]
fn map_then_unmap_restores_frames() {
    let mem = memory();
    let asid = space_with(&mem, 0x40_0000, 0x40_4000, Protection::RW);
    let before = mem.pmm.free_frames();

    let frame = mem.pmm.alloc_page(FrameUsage::Anon, AllocFlags::ZERO).unwrap();
    mem.vmm
        .map(asid, va(0x40_1000), frame, Protection::READ, PteFlags::empty())
        .unwrap();
    let (pfn, flags) = mapped(mem.vmm.translate(asid, va(0x40_1000)).unwrap());
    assert_eq!(pfn, frame);
    assert!(!flags.contains(PteFlags::WRITABLE));

    assert_eq!(mem.vmm.unmap(asid, range(0x40_0000, 0x4000)), Ok(1));
    assert_eq!(mem.vmm.translate(asid, va(0x40_1000)).unwrap(), Translation::NotMapped);
    // Frame e page table devolvidos
    assert_eq!(mem.pmm.free_frames(), before);
    assert_eq!(mem.vmm.space(asid).unwrap().lock().pt_frames, 0);
}

#[test]
fn map_rejects_bad_requests() {
    let mem = memory();
    let asid = space_with(&mem, 0x10_0000, 0x10_2000, Protection::READ);
    let frame = mem.pmm.alloc_page(FrameUsage::Anon, AllocFlags::ZERO).unwrap();

    let map = |addr: u32, prot: Protection| mem.vmm.map(asid, va(addr), frame, prot, PteFlags::empty());
    assert_eq!(map(0x10_0010, Protection::READ), Err(MmError::NotAligned));
    assert_eq!(map(0xC000_0000, Protection::READ), Err(MmError::InvalidAddress));
    assert_eq!(map(0x20_0000, Protection::READ), Err(MmError::NoVma));
    assert_eq!(map(0x10_0000, Protection::RW), Err(MmError::ProtectionFault));

    mem.pmm.get(frame);
    map(0x10_0000, Protection::READ).unwrap();
    assert_eq!(map(0x10_0000, Protection::READ), Err(MmError::AlreadyMapped));
    assert_eq!(mem.pmm.refcount(frame), 2);
    mem.pmm.put(frame);
}

#[test]
fn fork_shares_pages_copy_on_write() {
    let mem = memory();
    let parent = space_with(&mem, 0, 0x1000, Protection::RW);
    let frame = mem.pmm.alloc_page(FrameUsage::Anon, AllocFlags::ZERO).unwrap();
    mem.vmm.map(parent, va(0), frame, Protection::RW, PteFlags::empty()).unwrap();
    mem.vmm.write_user(parent, va(0), b"parent").unwrap();

    let child = mem.vmm.clone_space(parent).unwrap();
    for asid in [parent, child] {
        let (pfn, flags) = mapped(mem.vmm.translate(asid, va(0)).unwrap());
        assert_eq!(pfn, frame);
        assert!(flags.contains(PteFlags::COW));
        assert!(!flags.contains(PteFlags::WRITABLE));
    }
    assert_eq!(mem.pmm.refcount(frame), 2);

    // Escrita no pai: cópia nova, o filho fica com o original
    let write = FaultError::USER | FaultError::WRITE | FaultError::PRESENT;
    assert_eq!(mem.vmm.fault(parent, va(0), write), FaultResult::Handled);
    let (copy, flags) = mapped(mem.vmm.translate(parent, va(0)).unwrap());
    assert_ne!(copy, frame);
    assert!(flags.contains(PteFlags::WRITABLE));
    assert!(!flags.contains(PteFlags::COW));
    assert_eq!(mem.pmm.refcount(frame), 1);
    let (pfn, flags) = mapped(mem.vmm.translate(child, va(0)).unwrap());
    assert_eq!(pfn, frame);
    assert!(flags.contains(PteFlags::COW));

    mem.vmm.write_user(parent, va(0), b"PARENT").unwrap();
    let mut seen = [0u8; 6];
    mem.vmm.read_user(child, va(0), &mut seen).unwrap();
    assert_eq!(&seen, b"parent");
    mem.vmm.read_user(parent, va(0), &mut seen).unwrap();
    assert_eq!(&seen, b"PARENT");

    // Último dono: a escrita reaproveita o frame
    assert_eq!(mem.vmm.fault(child, va(0), write), FaultResult::Handled);
    let (pfn, flags) = mapped(mem.vmm.translate(child, va(0)).unwrap());
    assert_eq!(pfn, frame);
    assert!(flags.contains(PteFlags::WRITABLE));
    assert!(crate::mm::audit::audit(&mem.vmm).is_ok());
}

#[test]
fn fork_of_swapped_page_keeps_both_copies() {
    let mem = memory();
    let parent = space_with(&mem, 0x8000, 0x9000, Protection::RW);
    mem.vmm.write_user(parent, va(0x8000), b"swapped").unwrap();
    assert!(matches!(
        mem.vmm.evict(parent, va(0x8000)),
        Ok(crate::mm::Evicted::Swapped(_))
    ));

    let child = mem.vmm.clone_space(parent).unwrap();
    let mut seen = [0u8; 7];
    mem.vmm.read_user(child, va(0x8000), &mut seen).unwrap();
    assert_eq!(&seen, b"swapped");
    mem.vmm.write_user(child, va(0x8000), b"CHILD!!").unwrap();
    mem.vmm.read_user(parent, va(0x8000), &mut seen).unwrap();
    assert_eq!(&seen, b"swapped");
    assert_eq!(mem.swap.used(), 0);
}

#[test]
fn protect_splits_region_and_revokes_write() {
    let mem = memory();
    let asid = space_with(&mem, 0x10000, 0x14000, Protection::RW);
    mem.vmm.write_user(asid, va(0x11000), b"abc").unwrap();

    mem.vmm.protect(asid, range(0x11000, 0x1000), Protection::READ).unwrap();
    let vmas = mem.vmm.space(asid).unwrap().vmas();
    assert_eq!(vmas.len(), 3);
    assert_eq!(vmas[1].start, va(0x11000));
    assert_eq!(vmas[1].end, va(0x12000));
    assert_eq!(vmas[1].prot, Protection::READ);

    let (_, flags) = mapped(mem.vmm.translate(asid, va(0x11000)).unwrap());
    assert!(!flags.contains(PteFlags::WRITABLE));
    assert_eq!(mem.vmm.write_user(asid, va(0x11000), b"x"), Err(Errno::EFAULT));
    let mut seen = [0u8; 3];
    mem.vmm.read_user(asid, va(0x11000), &mut seen).unwrap();
    assert_eq!(&seen, b"abc");

    // Vizinhas continuam graváveis
    mem.vmm.write_user(asid, va(0x12000), b"ok").unwrap();
    assert_eq!(
        mem.vmm.protect(asid, range(0x13000, 0x2000), Protection::READ),
        Err(MmError::NoVma)
    );
}

#[test]
fn protect_none_hides_page_until_restored() {
    let mem = memory();
    let asid = space_with(&mem, 0x20000, 0x21000, Protection::RW);
    mem.vmm.write_user(asid, va(0x20000), b"hi").unwrap();

    mem.vmm.protect(asid, range(0x20000, 0x1000), Protection::empty()).unwrap();
    let mut seen = [0u8; 2];
    assert_eq!(mem.vmm.read_user(asid, va(0x20000), &mut seen), Err(Errno::EFAULT));

    mem.vmm.protect(asid, range(0x20000, 0x1000), Protection::READ).unwrap();
    mem.vmm.read_user(asid, va(0x20000), &mut seen).unwrap();
    assert_eq!(&seen, b"hi");
}

#[test]
fn stack_grows_down_within_guard_gap() {
    let mem = memory();
    let asid = mem.vmm.create_space().unwrap();
    let stack = Vma::anonymous(0x7000_0000, 0x7001_0000, Protection::RW).with_flags(VmaFlags::GROWS_DOWN);
    mem.vmm.map_region(asid, stack).unwrap();

    let write = FaultError::USER | FaultError::WRITE;
    assert_eq!(mem.vmm.fault(asid, va(0x6FFF_F800), write), FaultResult::Handled);
    let vmas = mem.vmm.space(asid).unwrap().vmas();
    assert_eq!(vmas[0].start, va(0x6FFF_F000));

    let far = 0x6FFF_F000 - STACK_GUARD_GAP - 0x1000;
    assert_eq!(
        mem.vmm.fault(asid, va(far), write),
        FaultResult::Signal(Signal::SigSegv)
    );
}

#[test]
fn bad_faults_are_classified() {
    let mem = memory();
    let asid = space_with(&mem, 0x1000, 0x2000, Protection::READ);

    // Escrita em VMA só leitura
    assert_eq!(
        mem.vmm.fault(asid, va(0x1000), FaultError::USER | FaultError::WRITE),
        FaultResult::Signal(Signal::SigSegv)
    );
    // Execução sem EXEC
    assert_eq!(
        mem.vmm.fault(asid, va(0x1000), FaultError::USER | FaultError::IFETCH),
        FaultResult::Signal(Signal::SigSegv)
    );
    assert_eq!(
        mem.vmm.fault(asid, va(0xC000_1000), FaultError::USER),
        FaultResult::Signal(Signal::SigSegv)
    );
    assert_eq!(
        mem.vmm.fault(asid, va(0x1000), FaultError::USER | FaultError::RSVD),
        FaultResult::Signal(Signal::SigSegv)
    );
    // O kernel tocando endereço sem VMA não tem a quem mandar sinal
    assert_eq!(mem.vmm.fault(asid, va(0x9000), FaultError::empty()), FaultResult::Fatal);
    assert_eq!(mem.vmm.fault(asid, va(0xC000_1000), FaultError::empty()), FaultResult::Fatal);
}

#[test]
fn unmap_region_removes_and_splits_vmas() {
    let mem = memory();
    let asid = space_with(&mem, 0x30000, 0x34000, Protection::RW);
    for page in [0x30000, 0x31000, 0x32000] {
        mem.vmm.write_user(asid, va(page), &[1]).unwrap();
    }

    assert_eq!(mem.vmm.unmap_region(asid, range(0x31000, 0x1000)), Ok(1));
    let vmas = mem.vmm.space(asid).unwrap().vmas();
    assert_eq!(vmas.len(), 2);
    assert_eq!(mem.vmm.space(asid).unwrap().rss(), 2);
    let mut byte = [0u8];
    assert_eq!(mem.vmm.read_user(asid, va(0x31000), &mut byte), Err(Errno::EFAULT));
    mem.vmm.read_user(asid, va(0x32000), &mut byte).unwrap();
    assert_eq!(byte, [1]);
}

#[test]
fn destroy_space_returns_everything() {
    let mem = memory();
    let baseline = mem.pmm.free_frames();

    let asid = space_with(&mem, 0x100_0000, 0x100_8000, Protection::RW);
    for i in 0..8 {
        mem.vmm.write_user(asid, va(0x100_0000 + i * 0x1000), &[i as u8]).unwrap();
    }
    mem.vmm.evict(asid, va(0x100_3000)).unwrap();
    let child = mem.vmm.clone_space(asid).unwrap();
    // O fork trouxe a página de volta do swap
    assert_eq!(mem.swap.used(), 0);

    mem.vmm.destroy_space(child).unwrap();
    mem.vmm.destroy_space(asid).unwrap();
    assert_eq!(mem.pmm.free_frames(), baseline);
    assert_eq!(mem.swap.used(), 0);
    assert_eq!(mem.vmm.space(asid).err(), Some(MmError::InvalidParameter));
    assert!(mem.pmm.audit().is_ok());
}
