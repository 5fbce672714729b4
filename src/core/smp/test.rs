//! Testes do SMP sobre a HAL simulada (cada AP é uma thread).

use super::*;
use crate::arch::hosted::{enter_cpu, ThreadStarter};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Sobe `n` CPUs: a thread do teste vira a CPU 0, as demais ficam em um
/// loop que só atende IPIs.
fn boot(n: usize) -> (Arc<Smp>, ThreadStarter) {
    enter_cpu(0);
    let smp = Arc::new(Smp::new(n));
    smp.mark_boot_cpu_online(0);
    let starter = ThreadStarter::new();
    for cpu in 1..n {
        let ap = smp.clone();
        smp.boot_secondary(
            &starter,
            cpu,
            alloc::boxed::Box::new(move || {
                assert!(ap.mark_online(cpu));
                loop {
                    ap.handle_ipis();
                    Cpu::halt();
                }
            }),
        )
        .unwrap();
    }
    (smp, starter)
}

fn shutdown(smp: &Smp, starter: &ThreadStarter) {
    smp.stop_others();
    starter.join_all();
    assert_eq!(smp.online_mask(), CpuMask::single(0));
}

#[test]
fn smp_call_with_wait_runs_on_every_target() {
    let (smp, starter) = boot(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));

    let (c, s) = (counter.clone(), seen.clone());
    smp.smp_call(
        CpuMask::of(&[1, 2, 3]),
        move |cpu| {
            c.fetch_add(1, Ordering::SeqCst);
            s.fetch_or(1 << cpu, Ordering::SeqCst);
        },
        true,
    )
    .unwrap();

    // Retornou só depois das três
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(seen.load(Ordering::SeqCst), 0b1110);
    shutdown(&smp, &starter);
}

#[test]
fn local_cpu_in_set_runs_inline() {
    let (smp, starter) = boot(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    smp.smp_call(CpuMask::of(&[0, 1]), move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    }, true)
    .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    shutdown(&smp, &starter);
}

#[test]
fn offline_target_is_rejected() {
    let (smp, starter) = boot(2);
    let err = smp.smp_call(CpuMask::of(&[1, 3]), |_| {}, true).unwrap_err();
    assert_eq!(err, SmpError::Offline(3));
    shutdown(&smp, &starter);
}

#[test]
fn reschedule_while_pending_is_a_no_op() {
    enter_cpu(0);
    let smp = Smp::new(2);
    smp.mark_boot_cpu_online(0);
    smp.send_ipi(0, IpiReason::Reschedule);
    smp.send_ipi(0, IpiReason::Reschedule);
    assert_eq!(smp.cpu(0).pending_ipis(), IpiReason::Reschedule.bit());

    let first = smp.handle_ipis();
    assert!(first.reschedule);
    assert!(smp.cpu(0).need_resched());
    // Nada sobrou: o segundo pedido foi absorvido pelo primeiro
    assert_eq!(smp.handle_ipis(), IpiSummary::default());
    assert_eq!(smp.cpu(0).ipis_received(), 1);
}

#[test]
fn ap_that_never_reports_times_out() {
    struct DeadStarter;
    impl SecondaryStart for DeadStarter {
        fn start(&self, _cpu: CpuId, _entry: alloc::boxed::Box<dyn FnOnce() + Send>) -> bool {
            true
        }
    }

    enter_cpu(0);
    let smp = Smp::new(2);
    smp.mark_boot_cpu_online(0);
    let err = smp
        .boot_secondary(&DeadStarter, 1, alloc::boxed::Box::new(|| {}))
        .unwrap_err();
    assert_eq!(err, SmpError::Timeout);
    assert_eq!(smp.cpu(1).state(), CpuState::Offline);
    // Um reporte tardio não reanima a CPU
    assert!(!smp.mark_online(1));
    assert!(!smp.is_online(1));
}

#[test]
fn tlb_shootdown_waits_for_remote_ack() {
    let (smp, starter) = boot(3);
    smp.tlb_shootdown(CpuMask::of(&[0, 1, 2]), 0, 0x1000, 0x3000);
    assert!(smp.cpu(1).ipis_received() >= 1);
    assert!(smp.cpu(2).ipis_received() >= 1);
    shutdown(&smp, &starter);
}
