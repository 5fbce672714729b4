//! Tabela de tarefas: arena de slots com geração.

use super::task::{Task, TaskId};
use alloc::sync::Arc;
use alloc::vec::Vec;

struct Slot {
    generation: u32,
    task: Option<Arc<Task>>,
}

#[derive(Default)]
pub struct TaskTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Reserva um ID. A tarefa é instalada depois com [`TaskTable::install`].
    pub fn reserve(&mut self) -> TaskId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1).max(1);
            return TaskId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            task: None,
        });
        TaskId::new(index, 1)
    }

    pub fn install(&mut self, task: Arc<Task>) {
        let id = task.id();
        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.generation == id.generation() && slot.task.is_none());
        slot.task = Some(task);
        self.live += 1;
    }

    /// Devolve um ID reservado que não chegou a ser instalado.
    pub fn unreserve(&mut self, id: TaskId) {
        if self.slot_matches(id) && self.slots[id.index()].task.is_none() {
            self.free.push(id.index() as u32);
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Arc<Task>> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.task.as_ref()
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Arc<Task>> {
        if !self.slot_matches(id) {
            return None;
        }
        let task = self.slots[id.index()].task.take()?;
        self.free.push(id.index() as u32);
        self.live -= 1;
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.slots.iter().filter_map(|s| s.task.as_ref())
    }

    fn slot_matches(&self, id: TaskId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|s| s.generation == id.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Context;
    use crate::core::smp::CpuMask;

    fn task(id: TaskId) -> Arc<Task> {
        Arc::new(Task::new(
            id,
            "t",
            0,
            CpuMask::single(0),
            None,
            None,
            Context::for_current(),
            false,
        ))
    }

    #[test]
    fn stale_id_does_not_resolve_after_reuse() {
        let mut table = TaskTable::new();
        let a = table.reserve();
        table.install(task(a));
        assert!(table.remove(a).is_some());

        let b = table.reserve();
        table.install(task(b));
        assert_eq!(a.pid(), b.pid());
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
        assert!(table.remove(a).is_none());
        assert_eq!(table.len(), 1);
    }
}
