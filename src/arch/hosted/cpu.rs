//! CPU simulada: estado por thread do host.

use crate::arch::traits::{CpuId, CpuOps};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, Thread};
use std::time::Duration;

std::thread_local! {
    static CPU_ID: Cell<CpuId> = const { Cell::new(0) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static CR2: Cell<u32> = const { Cell::new(0) };
    static CR3: Cell<u32> = const { Cell::new(0) };
    static TLB: RefCell<HashMap<(u32, u32), u32>> = RefCell::new(HashMap::new());
}

/// Threads que representam CPUs, para entrega de IPI por `unpark`.
static CPU_THREADS: Mutex<Vec<(CpuId, Thread)>> = Mutex::new(Vec::new());

/// Latches de portas de I/O (o último valor escrito é o lido).
static PORTS: Mutex<BTreeMap<u16, u8>> = Mutex::new(BTreeMap::new());

/// Carga de unwind de uma CPU simulada que parou (STOP / hang).
pub struct CpuHalted;

/// Quanto um `halt` simulado dorme esperando interrupção.
const HALT_SLICE: Duration = Duration::from_micros(200);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Faz a thread atual assumir a identidade da CPU `id`.
pub fn enter_cpu(id: CpuId) {
    CPU_ID.with(|c| c.set(id));
    let me = thread::current();
    let mut threads = lock(&CPU_THREADS);
    threads.retain(|(_, t)| t.id() != me.id());
    threads.push((id, me));
}

/// Remove a thread atual do registro de entrega de IPI.
pub fn leave_cpu() {
    let me = thread::current().id();
    lock(&CPU_THREADS).retain(|(_, t)| t.id() != me);
}

/// Define o CR2 simulado (endereço de falha) antes de injetar um #PF.
pub fn set_cr2(va: u32) {
    CR2.with(|c| c.set(va));
}

/// Usado pela troca de contexto: a CPU (id, CR3) migra com o bastão.
pub(super) fn adopt(id: CpuId, cr3: u32) {
    enter_cpu(id);
    CR3.with(|c| c.set(cr3));
    TLB.with(|t| t.borrow_mut().clear());
}

pub struct Cpu;

impl CpuOps for Cpu {
    fn current_id() -> CpuId {
        CPU_ID.with(|c| c.get())
    }

    fn halt() {
        thread::park_timeout(HALT_SLICE);
    }

    fn pause() {
        core::hint::spin_loop();
        thread::yield_now();
    }

    fn irq_enable() {
        IRQ_ENABLED.with(|f| f.set(true));
    }

    fn irq_disable() {
        IRQ_ENABLED.with(|f| f.set(false));
    }

    fn interrupts_enabled() -> bool {
        IRQ_ENABLED.with(|f| f.get())
    }

    fn read_cr2() -> u32 {
        CR2.with(|c| c.get())
    }

    fn read_cr3() -> u32 {
        CR3.with(|c| c.get())
    }

    unsafe fn write_cr3(root: u32) {
        CR3.with(|c| c.set(root));
        Self::flush_tlb_local();
    }

    unsafe fn invlpg(va: u32) {
        let vpn = va >> 12;
        TLB.with(|t| t.borrow_mut().retain(|&(_, page), _| page != vpn));
    }

    fn flush_tlb_local() {
        TLB.with(|t| t.borrow_mut().clear());
    }

    fn tlb_lookup(root: u32, va: u32) -> Option<u32> {
        TLB.with(|t| t.borrow().get(&(root, va >> 12)).copied())
    }

    fn tlb_fill(root: u32, va: u32, pte: u32) {
        TLB.with(|t| t.borrow_mut().insert((root, va >> 12), pte));
    }

    unsafe fn inb(port: u16) -> u8 {
        lock(&PORTS).get(&port).copied().unwrap_or(0xFF)
    }

    unsafe fn outb(port: u16, value: u8) {
        lock(&PORTS).insert(port, value);
    }

    fn hang() -> ! {
        // Uma thread não pode parar para sempre sem travar a suíte: desenrola
        // até quem a criou (ThreadStarter), que a encerra.
        Self::irq_disable();
        std::panic::resume_unwind(std::boxed::Box::new(CpuHalted))
    }

    fn send_ipi(target: CpuId, _vector: u8) {
        // O motivo já está no bitmap pendente do alvo; aqui só acordamos a thread.
        for (id, thread) in lock(&CPU_THREADS).iter() {
            if *id == target {
                thread.unpark();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_flags_save_and_restore() {
        Cpu::irq_enable();
        let flags = Cpu::irq_disable_save();
        assert!(!Cpu::interrupts_enabled());
        let inner = Cpu::irq_disable_save();
        Cpu::irq_restore(inner);
        assert!(!Cpu::interrupts_enabled());
        Cpu::irq_restore(flags);
        assert!(Cpu::interrupts_enabled());
    }

    #[test]
    fn soft_tlb_is_per_thread_and_invalidated() {
        Cpu::tlb_fill(0x1000, 0x5000, 0x7003);
        assert_eq!(Cpu::tlb_lookup(0x1000, 0x5123), Some(0x7003));
        let other = std::thread::spawn(|| Cpu::tlb_lookup(0x1000, 0x5000)).join().unwrap();
        assert_eq!(other, None);
        unsafe { Cpu::invlpg(0x5000) };
        assert_eq!(Cpu::tlb_lookup(0x1000, 0x5000), None);
    }
}
