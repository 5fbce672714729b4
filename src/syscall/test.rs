//! Testes do despacho de syscalls.

use super::numbers::*;
use super::*;
use crate::core::irq::InterruptFrame;
use crate::klib::testkit::Machine;
use crate::sys::{Errno, SysResult};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

fn frame(num: usize, arg1: u32) -> InterruptFrame {
    let mut frame = InterruptFrame::user(crate::core::irq::vectors::SYSCALL);
    frame.eax = num as u32;
    frame.ebx = arg1;
    frame
}

fn add_all(_env: &SyscallEnv<'_>, args: &SyscallArgs) -> SysResult<usize> {
    Ok(args.arg1 + args.arg2 + args.arg3 + args.arg4 + args.arg5 + args.arg6)
}

#[test]
fn arguments_come_from_ebx_to_ebp() {
    let rig = Machine::new(1);
    let table = SyscallTable::new();
    table.register(300, add_all).unwrap();

    let mut f = frame(300, 1);
    f.ecx = 2;
    f.edx = 3;
    f.esi = 4;
    f.edi = 5;
    f.ebp = 6;
    table.dispatch(&SyscallEnv { sched: &rig.sched }, &mut f);
    assert_eq!(f.eax, 21);
}

#[test]
fn unknown_and_out_of_range_numbers_return_enosys() {
    let rig = Machine::new(1);
    let table = SyscallTable::new();
    let env = SyscallEnv { sched: &rig.sched };

    for num in [0usize, 42, NR_SYSCALLS - 1, NR_SYSCALLS, 0xFFFF_FFFF] {
        let mut f = frame(num, 0);
        table.dispatch(&env, &mut f);
        assert_eq!(f.eax as i32, -38, "num {num}");
    }
}

#[test]
fn register_and_unregister_slots() {
    let table = SyscallTable::new();
    assert_eq!(table.register(NR_SYSCALLS, add_all), Err(Errno::EINVAL));
    table.register(SYS_WRITE, add_all).unwrap();
    assert_eq!(table.register(SYS_WRITE, add_all), Err(Errno::EBUSY));
    assert_eq!(table.registered(), 1);
    assert!(table.unregister(SYS_WRITE).is_ok());
    assert!(table.lookup(SYS_WRITE).is_none());
    assert_eq!(table.unregister(SYS_WRITE).err(), Some(Errno::ENOENT));
}

#[test]
fn core_calls_getpid_yield_and_exit() {
    let rig = Machine::new(1);
    let table = Arc::new(SyscallTable::new());
    register_core(&table).unwrap();
    assert_eq!(table.registered(), 3);

    let seen_pid = Arc::new(AtomicU32::new(0));
    let yielded = Arc::new(AtomicU32::new(u32::MAX));
    let (t, s, pid, y) = (table.clone(), rig.sched.clone(), seen_pid.clone(), yielded.clone());
    let id = rig
        .sched
        .spawn("user", move || {
            let env = SyscallEnv { sched: &s };
            let mut f = frame(SYS_GETPID, 0);
            t.dispatch(&env, &mut f);
            pid.store(f.eax, Ordering::SeqCst);

            let mut f = frame(SYS_SCHED_YIELD, 0);
            t.dispatch(&env, &mut f);
            y.store(f.eax, Ordering::SeqCst);

            // -3 em ebx chega como código de saída com sinal
            let mut f = frame(SYS_EXIT, (-3i32) as u32);
            t.dispatch(&env, &mut f);
            unreachable!("exit retornou");
        })
        .unwrap();

    assert_eq!(rig.sched.wait_for(id), Ok(-3));
    assert_eq!(seen_pid.load(Ordering::SeqCst), id.pid());
    assert_eq!(yielded.load(Ordering::SeqCst), 0);
}
