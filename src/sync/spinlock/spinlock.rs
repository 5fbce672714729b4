//! Spinlock - bloqueio com busy-wait e rank declarado.
//!
//! Há uma única estrutura de spinlock: `Spinlock<T>` é o `RawSpinlock`
//! (palavra de lock test-and-set) mais rank e dados protegidos. Não existe
//! variante "raw" separada com layout próprio.

use crate::sync::rank::{self, LockRank};
use crate::arch::{Cpu, CpuOps, IrqFlags};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Limite do backoff exponencial (em iterações de PAUSE).
const MAX_BACKOFF: u32 = 64;

/// Palavra de lock: test-and-set com backoff exponencial.
pub struct RawSpinlock {
    locked: AtomicBool,
}

impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn acquire(&self) {
        let mut backoff = 1;
        while !self.try_acquire() {
            // Espera só lendo, para não disputar a linha de cache
            while self.locked.load(Ordering::Relaxed) {
                for _ in 0..backoff {
                    Cpu::pause();
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    #[inline]
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Spinlock - usa busy-wait, NÃO pode dormir
///
/// # Quando usar
///
/// - Seções críticas MUITO curtas
/// - Dentro de handlers de interrupção (com `lock_irqsave`)
/// - Quando não pode chamar scheduler
///
/// # Quando NÃO usar
///
/// - Seções que podem demorar
/// - Quando pode chamar funções que dormem
/// - Para proteger I/O lento
pub struct Spinlock<T: ?Sized> {
    raw: RawSpinlock,
    rank: LockRank,
    data: UnsafeCell<T>,
}

// SAFETY: Spinlock protege acesso com lock atômico
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    /// Cria novo spinlock
    pub const fn new(rank: LockRank, data: T) -> Self {
        Self {
            raw: RawSpinlock::new(),
            rank,
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Spinlock<T> {
    /// Adquire o lock sem mexer no flag de interrupção.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        rank::acquire(self.rank);
        self.raw.acquire();
        SpinlockGuard {
            lock: self,
            irq: None,
        }
    }

    /// Salva e desabilita interrupções, depois adquire.
    /// O estado salvo é restaurado quando o guard é solto.
    pub fn lock_irqsave(&self) -> SpinlockGuard<'_, T> {
        let flags = Cpu::irq_disable_save();
        rank::acquire(self.rank);
        self.raw.acquire();
        SpinlockGuard {
            lock: self,
            irq: Some(flags),
        }
    }

    /// Tenta adquirir sem bloquear
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if self.raw.try_acquire() {
            rank::acquired_unchecked(self.rank);
            Some(SpinlockGuard {
                lock: self,
                irq: None,
            })
        } else {
            None
        }
    }

    pub fn try_lock_irqsave(&self) -> Option<SpinlockGuard<'_, T>> {
        let flags = Cpu::irq_disable_save();
        if self.raw.try_acquire() {
            rank::acquired_unchecked(self.rank);
            Some(SpinlockGuard {
                lock: self,
                irq: Some(flags),
            })
        } else {
            // Não conseguiu, restaurar interrupções
            Cpu::irq_restore(flags);
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn rank(&self) -> LockRank {
        self.rank
    }

    /// Acesso exclusivo sem lock (o `&mut` já garante exclusão).
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// Guard do spinlock - libera ao sair do escopo
pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
    irq: Option<IrqFlags>,
}

impl<T: ?Sized> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Lock está adquirido
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Lock está adquirido
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
        rank::release(self.lock.rank);

        // Restaurar interrupções se estavam habilitadas
        if let Some(flags) = self.irq {
            Cpu::irq_restore(flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn irqsave_restores_previous_state() {
        Cpu::irq_enable();
        let lock = Spinlock::new(LockRank::Log, 0u32);
        {
            let mut guard = lock.lock_irqsave();
            *guard += 1;
            assert!(!Cpu::interrupts_enabled());
        }
        assert!(Cpu::interrupts_enabled());

        Cpu::irq_disable();
        drop(lock.lock_irqsave());
        assert!(!Cpu::interrupts_enabled());
        Cpu::irq_enable();
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(LockRank::Zone, ());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn mutual_exclusion_across_threads() {
        let lock = Arc::new(Spinlock::new(LockRank::Zone, 0usize));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*lock.lock(), 40_000);
    }
}
