//! Shootdown: uma CPU desmapeia, a outra não pode continuar enxergando a
//! página pela TLB.

use super::{range, va};
use crate::arch::hosted::{enter_cpu, ThreadStarter};
use crate::arch::{Cpu, CpuOps};
use crate::core::smp::{CpuMask, Smp};
use crate::klib::testkit::Memory;
use crate::mm::{Protection, Vma};
use crate::sys::Errno;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicI32, Ordering};

const PAGE: u32 = 0x5000_0000;

/// CPU 0 é a thread do teste; a CPU 1 só atende IPIs.
fn two_cpus() -> (Arc<Smp>, ThreadStarter) {
    enter_cpu(0);
    let smp = Arc::new(Smp::new(2));
    smp.mark_boot_cpu_online(0);
    let starter = ThreadStarter::new();
    let ap = smp.clone();
    smp.boot_secondary(
        &starter,
        1,
        Box::new(move || {
            assert!(ap.mark_online(1));
            loop {
                ap.handle_ipis();
                Cpu::halt();
            }
        }),
    )
    .unwrap();
    (smp, starter)
}

/// 0 = ok, senão o errno
fn code(result: Result<(), Errno>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(errno) => errno as i32,
    }
}

#[test]
fn unmap_invalidates_remote_tlb() {
    let (smp, starter) = two_cpus();
    let mem = Memory::new(smp.clone());
    let asid = mem.vmm.create_space().unwrap();
    mem.vmm
        .map_region(asid, Vma::anonymous(PAGE, PAGE + 0x1000, Protection::RW))
        .unwrap();
    mem.vmm.activate(asid).unwrap();
    mem.vmm.write_user(asid, va(PAGE), b"seen").unwrap();

    // CPU 1 carrega o address space e enche a própria TLB
    let outcome = Arc::new(AtomicI32::new(-1));
    let (vmm, out) = (mem.vmm.clone(), outcome.clone());
    smp.smp_call_single(
        1,
        move |_| {
            let mut buf = [0u8; 4];
            let result = vmm.activate(asid).map_err(|_| Errno::EINVAL).and_then(|()| {
                vmm.read_user(asid, va(PAGE), &mut buf)
            });
            let ok = result.is_ok() && &buf == b"seen";
            out.store(if ok { 0 } else { code(result).max(1) }, Ordering::SeqCst);
        },
        true,
    )
    .unwrap();
    assert_eq!(outcome.load(Ordering::SeqCst), 0);
    let space = mem.vmm.space(asid).unwrap();
    assert_eq!(space.loaded().load(), CpuMask::of(&[0, 1]));

    let ipis = smp.cpu(1).ipis_received();
    assert_eq!(mem.vmm.unmap_region(asid, range(PAGE, 0x1000)), Ok(1));
    assert!(smp.cpu(1).ipis_received() > ipis);

    // Sem a invalidação a leitura ainda acharia o frame antigo na TLB
    let (vmm, out) = (mem.vmm.clone(), outcome.clone());
    smp.smp_call_single(
        1,
        move |_| {
            let mut buf = [0u8; 4];
            out.store(code(vmm.read_user(asid, va(PAGE), &mut buf)), Ordering::SeqCst);
        },
        true,
    )
    .unwrap();
    assert_eq!(outcome.load(Ordering::SeqCst), Errno::EFAULT as i32);

    smp.stop_others();
    starter.join_all();
}

#[test]
fn destroy_unloads_space_from_every_cpu() {
    let (smp, starter) = two_cpus();
    let mem = Memory::new(smp.clone());
    let asid = mem.vmm.create_space().unwrap();

    let vmm = mem.vmm.clone();
    smp.smp_call_single(
        1,
        move |_| {
            let _ = vmm.activate(asid);
        },
        true,
    )
    .unwrap();
    assert_eq!(smp.cpu(1).loaded_space(), asid.raw());

    let baseline_root = mem.vmm.space(asid).unwrap().root();
    mem.vmm.destroy_space(asid).unwrap();
    assert_ne!(smp.cpu(1).loaded_space(), asid.raw());
    assert!(!mem.pmm.is_managed(baseline_root));

    smp.stop_others();
    starter.join_all();
}
