use crate::klib::testkit::Machine;
use crate::sched::TaskState;
use crate::sync::{Completion, Semaphore, WaitError};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn complete_releases_one_waiter_per_call() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let c = Arc::new(Completion::new());
    let passed = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (c, p, sc) = (c.clone(), passed.clone(), s.clone());
        ids.push(
            s.spawn("waiter", move || {
                c.wait(&sc);
                p.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
    }

    m.settle(20);
    assert_eq!(passed.load(Ordering::SeqCst), 0);
    c.complete(&s);
    m.run_until(|| passed.load(Ordering::SeqCst) == 1);
    m.settle(20);
    assert_eq!(passed.load(Ordering::SeqCst), 1);

    c.complete(&s);
    for id in ids {
        assert_eq!(s.wait_for(id), Ok(0));
    }
    assert!(!c.is_done());
}

#[test]
fn complete_all_is_idempotent() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let c = Completion::new();

    c.complete_all(&s);
    c.complete_all(&s);
    for _ in 0..100 {
        assert!(c.try_wait());
    }
    assert!(c.is_done());

    // complete depois de complete_all não muda nada
    c.complete(&s);
    assert!(c.try_wait());
    assert!(c.is_done());
}

#[test]
fn try_wait_consumes_counted_completions() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let c = Completion::new();

    assert!(!c.try_wait());
    c.complete(&s);
    c.complete(&s);
    assert!(c.try_wait());
    assert!(c.try_wait());
    assert!(!c.try_wait());

    c.complete(&s);
    c.reinit();
    assert!(!c.is_done());
}

#[test]
fn completion_wait_timeout_expires() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let c = Arc::new(Completion::new());
    let result = Arc::new(spin::Mutex::new(None));

    let (cc, r, sc) = (c.clone(), result.clone(), s.clone());
    let t = s
        .spawn("timeout", move || *r.lock() = Some(cc.wait_timeout(&sc, 2)))
        .unwrap();

    m.tick_until(|| s.task(t).is_some_and(|task| task.state() == TaskState::Zombie));
    assert_eq!(*result.lock(), Some(Err(WaitError::TimedOut)));
    assert_eq!(s.wait_for(t), Ok(0));
}

#[test]
fn semaphore_down_timeout_and_up() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let sem = Arc::new(Semaphore::new(1));
    let results = Arc::new(spin::Mutex::new(Vec::new()));

    let (sm, r, sc) = (sem.clone(), results.clone(), s.clone());
    let t = s
        .spawn("sem", move || {
            r.lock().push(sm.down_timeout(&sc, 2));
            r.lock().push(sm.down_timeout(&sc, 2));
        })
        .unwrap();

    m.tick_until(|| s.task(t).is_some_and(|task| task.state() == TaskState::Zombie));
    assert_eq!(*results.lock(), [Ok(()), Err(WaitError::TimedOut)]);
    assert_eq!(sem.count(), 0);
    assert_eq!(s.wait_for(t), Ok(0));

    sem.up(&s);
    assert!(sem.try_down());
    assert!(!sem.try_down());
}
