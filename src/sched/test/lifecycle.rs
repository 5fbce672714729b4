use crate::klib::testkit::Machine;
use crate::sched::{SchedError, TaskState};
use crate::sys::Signal;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[test]
fn exit_code_is_collected_by_parent() {
    let rig = Machine::new(1);
    let s = rig.sched.clone();

    let plain = s.spawn("plain", || {}).unwrap();
    let inner = s.clone();
    let explicit = s.spawn("explicit", move || inner.exit_current(7)).unwrap();

    assert_eq!(s.wait_for(plain), Ok(0));
    assert_eq!(s.wait_for(explicit), Ok(7));
    // Recolhida: o ID não resolve mais
    assert!(s.task(explicit).is_none());
    assert_eq!(s.reap(explicit), Err(SchedError::NoSuchTask));
    assert_eq!(s.nr_tasks(), 1);
}

#[test]
fn panicking_task_exits_with_minus_one() {
    let rig = Machine::new(1);
    let id = rig.sched.spawn("boom", || panic!("falha proposital")).unwrap();
    assert_eq!(rig.sched.wait_for(id), Ok(-1));
}

#[test]
fn round_robin_alternates_yielding_tasks() {
    let rig = Machine::new(1);
    let s = rig.sched.clone();
    let trace = Arc::new(Mutex::new(Vec::new()));

    let mut ids = Vec::new();
    for tag in ['a', 'b'] {
        let (t, sc) = (trace.clone(), s.clone());
        ids.push(
            s.spawn("rr", move || {
                t.lock().unwrap().push(tag);
                sc.yield_now();
                t.lock().unwrap().push(tag);
            })
            .unwrap(),
        );
    }
    for id in ids {
        s.wait_for(id).unwrap();
    }
    assert_eq!(*trace.lock().unwrap(), ['a', 'b', 'a', 'b']);
}

#[test]
fn sleep_lasts_until_the_timer_fires() {
    let rig = Machine::new(1);
    let s = rig.sched.clone();
    let woke_at = Arc::new(AtomicUsize::new(0));

    let (w, sc) = (woke_at.clone(), s.clone());
    let start = s.clock().now();
    let id = s
        .spawn("sleeper", move || {
            sc.sleep_ms(50);
            w.store(sc.clock().now() as usize, Ordering::SeqCst);
        })
        .unwrap();

    rig.tick_until(|| s.task(id).is_some_and(|t| t.state() == TaskState::Zombie));
    // 50 ms a 100 Hz = 5 ticks
    assert!(woke_at.load(Ordering::SeqCst) as u64 >= start + 5);
    assert_eq!(s.pending_timers(), 0);
    assert_eq!(s.wait_for(id), Ok(0));
}

#[test]
fn stopped_task_does_not_run_until_continued() {
    let rig = Machine::new(2);
    let s = rig.sched.clone();
    let counter = Arc::new(AtomicUsize::new(0));
    let quit = Arc::new(AtomicBool::new(false));

    let (c, q, sc) = (counter.clone(), quit.clone(), s.clone());
    let id = s
        .spawn_with(
            crate::sched::SpawnOptions {
                name: "worker",
                affinity: Some(crate::core::smp::CpuMask::single(1)),
                aspace: None,
            },
            move || {
                while !q.load(Ordering::SeqCst) {
                    c.fetch_add(1, Ordering::SeqCst);
                    sc.yield_now();
                }
            },
        )
        .unwrap();

    rig.run_until(|| counter.load(Ordering::SeqCst) > 0);
    s.send_signal(id, Signal::SigStop).unwrap();
    rig.run_until(|| s.task(id).is_some_and(|t| t.state() == TaskState::Stopped));

    let frozen = counter.load(Ordering::SeqCst);
    rig.settle(50);
    assert_eq!(counter.load(Ordering::SeqCst), frozen);

    s.send_signal(id, Signal::SigCont).unwrap();
    rig.run_until(|| counter.load(Ordering::SeqCst) > frozen);

    quit.store(true, Ordering::SeqCst);
    assert_eq!(s.wait_for(id), Ok(0));
}

#[test]
fn spawn_rejects_affinity_without_online_cpu() {
    let rig = Machine::new(2);
    let err = rig
        .sched
        .spawn_with(
            crate::sched::SpawnOptions {
                name: "nowhere",
                affinity: Some(crate::core::smp::CpuMask::single(5)),
                aspace: None,
            },
            || {},
        )
        .unwrap_err();
    assert_eq!(err, SchedError::InvalidAffinity);
}
