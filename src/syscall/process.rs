//! Syscalls de tarefa implementadas pelo núcleo.
//!
//! - 1: exit
//! - 20: getpid
//! - 158: sched_yield

use super::abi::SyscallArgs;
use super::numbers::{SYS_EXIT, SYS_GETPID, SYS_SCHED_YIELD};
use super::table::{SyscallEnv, SyscallTable};
use crate::sys::SysResult;

/// Encerra a tarefa. O código é o `ebx` reinterpretado com sinal.
pub fn sys_exit(env: &SyscallEnv<'_>, args: &SyscallArgs) -> SysResult<usize> {
    env.sched.exit_current(args.arg1 as u32 as i32)
}

pub fn sys_getpid(env: &SyscallEnv<'_>, _args: &SyscallArgs) -> SysResult<usize> {
    Ok(env.sched.current_id().pid() as usize)
}

pub fn sys_sched_yield(env: &SyscallEnv<'_>, _args: &SyscallArgs) -> SysResult<usize> {
    env.sched.yield_now();
    Ok(0)
}

/// Instala as syscalls do núcleo.
pub fn register_core(table: &SyscallTable) -> SysResult<()> {
    table.register(SYS_EXIT, sys_exit)?;
    table.register(SYS_GETPID, sys_getpid)?;
    table.register(SYS_SCHED_YIELD, sys_sched_yield)?;
    Ok(())
}
