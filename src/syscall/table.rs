//! # Syscall Table
//!
//! Tabela de handlers indexada por número de syscall, atrás de um
//! `spin::RwLock`: o despacho só lê; `register`/`unregister` (boot ou carga
//! de colaboradores) escrevem.

use super::abi::SyscallArgs;
use super::numbers::NR_SYSCALLS;
use crate::core::irq::InterruptFrame;
use crate::sched::Scheduler;
use crate::sys::{encode_result, Errno, SysResult};
use spin::RwLock;

/// O que um handler enxerga do núcleo.
pub struct SyscallEnv<'a> {
    pub sched: &'a Scheduler,
}

/// Tipo de handler de syscall
pub type SyscallHandler = fn(&SyscallEnv<'_>, &SyscallArgs) -> SysResult<usize>;

/// `None` = syscall não implementada (-ENOSYS).
pub struct SyscallTable {
    slots: RwLock<[Option<SyscallHandler>; NR_SYSCALLS]>,
}

impl SyscallTable {
    pub const fn new() -> Self {
        Self {
            slots: RwLock::new([None; NR_SYSCALLS]),
        }
    }

    /// Instala `handler` em `num`. Um slot ocupado não é sobrescrito.
    pub fn register(&self, num: usize, handler: SyscallHandler) -> SysResult<()> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(num).ok_or(Errno::EINVAL)?;
        if slot.is_some() {
            return Err(Errno::EBUSY);
        }
        *slot = Some(handler);
        crate::kdebug!("(Syscall) registrada num=", num);
        Ok(())
    }

    pub fn unregister(&self, num: usize) -> SysResult<SyscallHandler> {
        let mut slots = self.slots.write();
        slots.get_mut(num).and_then(Option::take).ok_or(Errno::ENOENT)
    }

    pub fn lookup(&self, num: usize) -> Option<SyscallHandler> {
        self.slots.read().get(num).copied().flatten()
    }

    pub fn registered(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_some()).count()
    }

    /// Executa a syscall descrita em `args`.
    pub fn call(&self, env: &SyscallEnv<'_>, args: &SyscallArgs) -> SysResult<usize> {
        // A cópia do ponteiro solta o lock antes do handler (que pode dormir)
        let Some(handler) = self.lookup(args.num) else {
            crate::ktrace!("(Syscall) Desconhecida num=", args.num);
            return Err(Errno::ENOSYS);
        };
        handler(env, args)
    }

    /// Lê número e argumentos do frame e escreve o resultado em EAX.
    pub fn dispatch(&self, env: &SyscallEnv<'_>, frame: &mut InterruptFrame) {
        let args = SyscallArgs::from_frame(frame);
        crate::ktrace!("(Syscall) num=", args.num, " arg1=", args.arg1);
        let result = self.call(env, &args);
        frame.set_return(encode_result(result));
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}
