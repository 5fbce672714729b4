/// Arquivo: core/work/deferred.rs
///
/// Propósito: Execução Diferida por CPU.
/// Handlers de IRQ enfileiram trabalho aqui e retornam rápido; a fila é
/// drenada no topo de `schedule()` e na saída de IRQ para um contexto com
/// interrupções habilitadas.
///
/// Detalhes de Implementação:
/// - FIFO por CPU em anel fixo, produtor em qualquer contexto (lock com
///   irqsave). Fila cheia recusa o item em vez de crescer.
/// - Consumidor único: a CPU dona. O item roda fora do lock.

use crate::sync::{LockRank, Spinlock};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

/// Um item de trabalho: função + contexto, ou closure compartilhada.
#[derive(Clone)]
pub enum DeferredWork {
    Fn(fn(usize), usize),
    Task(Arc<dyn Fn() + Send + Sync>),
}

impl DeferredWork {
    pub fn run(self) {
        match self {
            Self::Fn(func, data) => func(data),
            Self::Task(task) => task(),
        }
    }
}

/// Itens pendentes por CPU. A fila não cresce: `defer` roda em IRQ.
pub const DEFERRED_CAPACITY: usize = 64;

/// Anel de tamanho fixo, sem alocação depois de construído.
struct Ring {
    slots: [Option<DeferredWork>; DEFERRED_CAPACITY],
    head: usize,
    len: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            slots: [const { None }; DEFERRED_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, work: DeferredWork) -> Result<(), DeferredWork> {
        if self.len == DEFERRED_CAPACITY {
            return Err(work);
        }
        let tail = (self.head + self.len) % DEFERRED_CAPACITY;
        self.slots[tail] = Some(work);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<DeferredWork> {
        if self.len == 0 {
            return None;
        }
        let work = self.slots[self.head].take();
        self.head = (self.head + 1) % DEFERRED_CAPACITY;
        self.len -= 1;
        work
    }
}

pub struct DeferredQueue {
    items: Spinlock<Ring>,
    /// Itens recusados por fila cheia
    overflows: AtomicU64,
}

impl DeferredQueue {
    pub const fn new() -> Self {
        Self {
            items: Spinlock::new(LockRank::PerCpu, Ring::new()),
            overflows: AtomicU64::new(0),
        }
    }

    /// Enfileira trabalho. Seguro em contexto de IRQ; nunca bloqueia nem
    /// aloca. Com a fila cheia o item volta para quem chamou.
    pub fn defer(&self, work: DeferredWork) -> Result<(), DeferredWork> {
        let pushed = self.items.lock_irqsave().push(work);
        if pushed.is_err() {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            crate::kwarn!("(IRQ) Fila de trabalho diferido cheia");
        }
        pushed
    }

    /// Executa tudo que estiver pendente, incluindo itens enfileirados pelos
    /// próprios itens. Retorna quantos rodaram.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.items.lock_irqsave().pop();
            match next {
                Some(work) => {
                    work.run();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock_irqsave().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static HITS: AtomicUsize = AtomicUsize::new(0);

    fn bump(by: usize) {
        HITS.fetch_add(by, Ordering::SeqCst);
    }

    #[test]
    fn drains_in_fifo_order() {
        let q = DeferredQueue::new();
        let order = Arc::new(Spinlock::new(LockRank::Log, alloc::vec::Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            assert!(q.defer(DeferredWork::Task(Arc::new(move || order.lock().push(i)))).is_ok());
        }
        assert!(q.defer(DeferredWork::Fn(bump, 5)).is_ok());
        assert_eq!(q.drain(), 4);
        assert_eq!(*order.lock(), [0, 1, 2]);
        assert_eq!(HITS.load(Ordering::SeqCst), 5);
        assert!(q.is_empty());
    }

    fn nothing(_: usize) {}

    #[test]
    fn full_queue_refuses_instead_of_growing() {
        let q = DeferredQueue::new();
        for i in 0..DEFERRED_CAPACITY {
            assert!(q.defer(DeferredWork::Fn(nothing, i)).is_ok());
        }
        let refused = q.defer(DeferredWork::Fn(nothing, 99));
        assert!(matches!(refused, Err(DeferredWork::Fn(_, 99))));
        assert_eq!(q.len(), DEFERRED_CAPACITY);
        assert_eq!(q.overflows(), 1);

        // O anel dá a volta: drenar libera as vagas
        assert_eq!(q.drain(), DEFERRED_CAPACITY);
        assert!(q.defer(DeferredWork::Fn(nothing, 1)).is_ok());
        assert_eq!(q.len(), 1);
    }
}
