use crate::klib::testkit::Machine;
use crate::sched::TaskState;
use crate::sync::{WaitError, WaitQueue};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[test]
fn waiter_observes_store_before_wake() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let wq = Arc::new(WaitQueue::new());
    let x = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(usize::MAX));

    let (q, xv, out, sc) = (wq.clone(), x.clone(), seen.clone(), s.clone());
    let t = s
        .spawn("waiter", move || {
            q.wait_event(&sc, || xv.load(Ordering::SeqCst) == 1);
            out.store(xv.load(Ordering::SeqCst), Ordering::SeqCst);
        })
        .unwrap();

    m.run_until(|| wq.len() == 1);
    let (q, xv) = (wq.clone(), x.clone());
    let sc = s.clone();
    let setter = s
        .spawn("setter", move || {
            xv.store(1, Ordering::SeqCst);
            q.wake_one(&sc);
        })
        .unwrap();

    assert_eq!(s.wait_for(setter), Ok(0));
    assert_eq!(s.wait_for(t), Ok(0));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(wq.is_empty());
}

#[test]
fn early_wake_makes_waiter_block_again() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let wq = Arc::new(WaitQueue::new());
    let x = Arc::new(AtomicUsize::new(0));
    let checks = Arc::new(AtomicUsize::new(0));

    let (q, xv, n, sc) = (wq.clone(), x.clone(), checks.clone(), s.clone());
    let t = s
        .spawn("waiter", move || {
            q.wait_event(&sc, || {
                n.fetch_add(1, Ordering::SeqCst);
                xv.load(Ordering::SeqCst) == 1
            });
        })
        .unwrap();

    let parked = || {
        wq.len() == 1
            && s.task(t)
                .is_some_and(|task| task.state() == TaskState::Uninterruptible && !task.is_on_cpu())
    };
    m.run_until(parked);
    let before = checks.load(Ordering::SeqCst);

    // Wake antes do store: acorda, vê x == 0 e volta a dormir
    assert_eq!(wq.wake_one(&s), 1);
    m.run_until(|| checks.load(Ordering::SeqCst) > before && parked());
    assert!(s.task(t).is_some_and(|task| task.state() != TaskState::Zombie));

    x.store(1, Ordering::SeqCst);
    wq.wake_one(&s);
    assert_eq!(s.wait_for(t), Ok(0));
}

#[test]
fn wake_one_wakes_a_single_exclusive_waiter() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let wq = Arc::new(WaitQueue::new());
    let go = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let mut ids = alloc::vec::Vec::new();
    for _ in 0..2 {
        let (q, g, d, sc) = (wq.clone(), go.clone(), done.clone(), s.clone());
        ids.push(
            s.spawn("excl", move || {
                let _ = q.wait_event_with(&sc, crate::sync::WaitFlags::EXCLUSIVE, None, || {
                    // Cada waiter consome um "token"
                    let cur = g.load(Ordering::SeqCst);
                    cur > 0
                        && g.compare_exchange(cur, cur - 1, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                });
                d.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
    }

    m.run_until(|| wq.len() == 2);
    go.store(1, Ordering::SeqCst);
    assert_eq!(wq.wake_one(&s), 1);
    m.run_until(|| done.load(Ordering::SeqCst) == 1);
    m.settle(50);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(wq.len(), 1);

    go.store(1, Ordering::SeqCst);
    wq.wake_one(&s);
    for id in ids {
        assert_eq!(s.wait_for(id), Ok(0));
    }
}

#[test]
fn timed_wait_gives_up_after_deadline() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let wq = Arc::new(WaitQueue::new());
    let result = Arc::new(spin::Mutex::new(None));

    let (q, r, sc) = (wq.clone(), result.clone(), s.clone());
    let start = s.clock().now();
    let t = s
        .spawn("timed", move || {
            *r.lock() = Some(q.wait_event_timeout(&sc, 3, || false));
        })
        .unwrap();

    m.tick_until(|| s.task(t).is_some_and(|task| task.state() == TaskState::Zombie));
    assert_eq!(*result.lock(), Some(Err(WaitError::TimedOut)));
    assert!(s.clock().now() >= start + 3);
    assert!(wq.is_empty());
    assert_eq!(s.wait_for(t), Ok(0));
}

#[test]
fn signal_interrupts_interruptible_wait() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let wq = Arc::new(WaitQueue::new());
    let interrupted = Arc::new(AtomicBool::new(false));

    let (q, flag, sc) = (wq.clone(), interrupted.clone(), s.clone());
    let t = s
        .spawn("sig", move || {
            let r = q.wait_event_interruptible(&sc, || false);
            flag.store(r == Err(WaitError::Interrupted), Ordering::SeqCst);
        })
        .unwrap();

    m.run_until(|| wq.len() == 1);
    s.send_signal(t, crate::sys::Signal::SigTerm).unwrap();
    assert_eq!(s.wait_for(t), Ok(0));
    assert!(interrupted.load(Ordering::SeqCst));
    assert!(wq.is_empty());
}

static SHARED_WAKES: AtomicUsize = AtomicUsize::new(0);

fn already_awake(_: &crate::sched::Scheduler, _: crate::sched::TaskId) -> bool {
    false
}

fn count_shared(_: &crate::sched::Scheduler, _: crate::sched::TaskId) -> bool {
    SHARED_WAKES.fetch_add(1, Ordering::SeqCst);
    true
}

#[test]
fn wake_one_stops_at_first_exclusive_even_if_awake() {
    use crate::sync::waitqueue::WaitEntry;
    use crate::sync::WaitFlags;

    let m = Machine::new(1);
    let s = m.sched.clone();
    let wq = WaitQueue::new();
    let me = s.current_id();

    let exclusive = Arc::new(WaitEntry::with_wake(me, WaitFlags::EXCLUSIVE, already_awake));
    let shared = Arc::new(WaitEntry::with_wake(me, WaitFlags::empty(), count_shared));
    wq.add(&exclusive);
    wq.add(&shared);

    // O exclusivo consome o wake sem acordar ninguém; o compartilhado atrás
    // dele fica na fila
    assert_eq!(wq.wake_one(&s), 0);
    assert!(!exclusive.is_queued());
    assert!(shared.is_queued());
    assert_eq!(SHARED_WAKES.load(Ordering::SeqCst), 0);

    // Agora ele está à frente
    assert_eq!(wq.wake_one(&s), 1);
    assert_eq!(SHARED_WAKES.load(Ordering::SeqCst), 1);
    assert!(wq.is_empty());
}
