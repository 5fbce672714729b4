use crate::klib::testkit::Machine;
use crate::sync::Mutex;
use alloc::sync::Arc;
use alloc::vec::Vec;

const ROUNDS: u64 = 20;

#[test]
fn mutex_serializes_critical_sections() {
    let m = Machine::new(2);
    let s = m.sched.clone();
    let counter = Arc::new(Mutex::new(0u64));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (c, sc) = (counter.clone(), s.clone());
        ids.push(
            s.spawn("incr", move || {
                for _ in 0..ROUNDS {
                    let mut guard = c.lock(&sc);
                    let seen = *guard;
                    // Cede no meio da seção crítica
                    sc.yield_now();
                    *guard = seen + 1;
                }
            })
            .unwrap(),
        );
    }
    for id in ids {
        assert_eq!(s.wait_for(id), Ok(0));
    }
    assert!(!counter.is_locked());
    assert_eq!(*counter.lock(&s), 3 * ROUNDS);
}

#[test]
fn try_lock_fails_while_held() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let lock = Mutex::new(());

    let guard = lock.lock(&s);
    assert_eq!(lock.owner(), Some(s.current_id()));
    drop(guard);
    assert!(lock.owner().is_none());

    let (l, sc) = (Arc::new(Mutex::new(())), s.clone());
    let held = l.lock(&s);
    let other = l.clone();
    let t = s
        .spawn("try", move || {
            assert!(other.try_lock(&sc).is_none());
        })
        .unwrap();
    assert_eq!(s.wait_for(t), Ok(0));
    drop(held);
}

#[test]
fn recursive_lock_kills_the_task() {
    let m = Machine::new(1);
    let s = m.sched.clone();
    let lock = Arc::new(Mutex::new(0));

    let (l, sc) = (lock.clone(), s.clone());
    let t = s
        .spawn("recursive", move || {
            let _outer = l.lock(&sc);
            let _inner = l.lock(&sc);
        })
        .unwrap();
    assert_eq!(s.wait_for(t), Ok(-1));
    // O guard externo foi liberado no unwind
    assert!(!lock.is_locked());
}
