//! Mutex - pode bloquear a tarefa

use crate::sched::{Scheduler, TaskId};
use crate::sync::waitqueue::{WaitError, WaitFlags, WaitQueue};
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

/// Dono quando livre (IDs de tarefa nunca são zero).
const UNLOCKED: u64 = 0;

/// Mutex - dorme na fila se não conseguir o lock
///
/// # Diferença do Spinlock
///
/// - Mutex PODE dormir (chama scheduler)
/// - Spinlock NÃO pode dormir (busy-wait)
///
/// Use Mutex para seções mais longas. Lock recursivo e unlock por quem não é
/// o dono são bugs fatais.
pub struct Mutex<T: ?Sized> {
    /// Tarefa dona
    owner: AtomicU64,
    waiters: WaitQueue,
    /// Dados protegidos
    data: UnsafeCell<T>,
}

// SAFETY: Mutex protege acesso com lock
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            owner: AtomicU64::new(UNLOCKED),
            waiters: WaitQueue::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    fn try_acquire(&self, me: TaskId) -> bool {
        self.owner
            .compare_exchange(UNLOCKED, me.raw(), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn check_not_owner(&self, me: TaskId) {
        if self.owner.load(Ordering::Relaxed) == me.raw() {
            panic!("mutex: lock recursivo pela tarefa dona");
        }
    }

    /// Adquire o lock (pode bloquear)
    pub fn lock<'a>(&'a self, sched: &'a Scheduler) -> MutexGuard<'a, T> {
        self.lock_raw(sched);
        MutexGuard::new(self, sched)
    }

    /// Como `lock`, mas desiste se chegar um sinal.
    pub fn lock_interruptible<'a>(
        &'a self,
        sched: &'a Scheduler,
    ) -> Result<MutexGuard<'a, T>, WaitError> {
        let me = sched.current_id();
        self.check_not_owner(me);
        self.waiters.wait_event_with(
            sched,
            WaitFlags::EXCLUSIVE | WaitFlags::INTERRUPTIBLE,
            None,
            || self.try_acquire(me),
        )?;
        Ok(MutexGuard::new(self, sched))
    }

    /// Tenta adquirir sem bloquear
    pub fn try_lock<'a>(&'a self, sched: &'a Scheduler) -> Option<MutexGuard<'a, T>> {
        let me = sched.current_id();
        self.check_not_owner(me);
        self.try_acquire(me).then(|| MutexGuard::new(self, sched))
    }

    /// Lock sem guard, para quem libera em outro ponto do código
    /// (par de [`Mutex::unlock_raw`]).
    pub fn lock_raw(&self, sched: &Scheduler) {
        let me = sched.current_id();
        self.check_not_owner(me);
        // Espera exclusiva sem sinal nem prazo: não falha
        let _ = self
            .waiters
            .wait_event_with(sched, WaitFlags::EXCLUSIVE, None, || self.try_acquire(me));
    }

    /// Libera o lock. Só a tarefa dona pode chamar.
    pub fn unlock_raw(&self, sched: &Scheduler) {
        let me = sched.current_id();
        if self
            .owner
            .compare_exchange(me.raw(), UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("mutex: liberado por tarefa que não é a dona");
        }
        self.waiters.wake_one(sched);
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Dono atual, se houver.
    pub fn owner(&self) -> Option<TaskId> {
        match self.owner.load(Ordering::Relaxed) {
            UNLOCKED => None,
            raw => Some(TaskId::from_raw(raw)),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct MutexGuard<'a, T: ?Sized> {
    lock: &'a Mutex<T>,
    sched: &'a Scheduler,
    /// O lock pertence à tarefa; o guard não muda de dona
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(lock: &'a Mutex<T>, sched: &'a Scheduler) -> Self {
        Self {
            lock,
            sched,
            _not_send: PhantomData,
        }
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Lock está adquirido
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Lock está adquirido exclusivamente
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_raw(self.sched);
    }
}
