//! Round-robin com fila FIFO por CPU e time slice fixo.

use super::SchedPolicy;
use crate::arch::CpuId;
use crate::sched::task::TaskId;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

struct RunQueue {
    queue: VecDeque<TaskId>,
    /// Ticks restantes da fatia da tarefa corrente
    slice_left: u32,
}

impl RunQueue {
    const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            slice_left: 0,
        }
    }
}

pub struct RoundRobin {
    queues: Vec<RunQueue>,
    timeslice: u32,
}

impl RoundRobin {
    pub fn new(nr_cpus: usize, timeslice: u32) -> Self {
        let mut queues = Vec::with_capacity(nr_cpus);
        queues.resize_with(nr_cpus, RunQueue::new);
        Self {
            queues,
            timeslice: timeslice.max(1),
        }
    }
}

impl SchedPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn enqueue(&mut self, cpu: CpuId, task: TaskId) {
        let rq = &mut self.queues[cpu];
        debug_assert!(!rq.queue.contains(&task), "tarefa enfileirada duas vezes");
        rq.queue.push_back(task);
    }

    fn dequeue(&mut self, cpu: CpuId, task: TaskId) -> bool {
        let rq = &mut self.queues[cpu];
        match rq.queue.iter().position(|&t| t == task) {
            Some(pos) => {
                rq.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    fn pick_next(&mut self, cpu: CpuId) -> Option<TaskId> {
        let rq = &mut self.queues[cpu];
        let next = rq.queue.pop_front()?;
        rq.slice_left = self.timeslice;
        Some(next)
    }

    fn task_tick(&mut self, cpu: CpuId, _task: TaskId) -> bool {
        let rq = &mut self.queues[cpu];
        rq.slice_left = rq.slice_left.saturating_sub(1);
        // Fatia esgotada só preempta se houver alguém esperando
        rq.slice_left == 0 && !rq.queue.is_empty()
    }

    fn nr_queued(&self, cpu: CpuId) -> usize {
        self.queues[cpu].queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> TaskId {
        TaskId::from_raw((1 << 32) | n)
    }

    #[test]
    fn fifo_order_per_cpu() {
        let mut rr = RoundRobin::new(2, 3);
        rr.enqueue(0, id(1));
        rr.enqueue(1, id(2));
        rr.enqueue(0, id(3));
        assert_eq!(rr.pick_next(0), Some(id(1)));
        assert_eq!(rr.pick_next(0), Some(id(3)));
        assert_eq!(rr.pick_next(0), None);
        assert_eq!(rr.nr_queued(1), 1);
    }

    #[test]
    fn slice_expires_only_with_competition() {
        let mut rr = RoundRobin::new(1, 2);
        rr.enqueue(0, id(1));
        let cur = rr.pick_next(0).unwrap();
        assert!(!rr.task_tick(0, cur));
        assert!(!rr.task_tick(0, cur));
        rr.enqueue(0, id(2));
        assert!(rr.task_tick(0, cur));
    }

    #[test]
    fn dequeue_removes_from_middle() {
        let mut rr = RoundRobin::new(1, 1);
        for n in 1..=3 {
            rr.enqueue(0, id(n));
        }
        assert!(rr.dequeue(0, id(2)));
        assert!(!rr.dequeue(0, id(2)));
        assert_eq!(rr.pick_next(0), Some(id(1)));
        assert_eq!(rr.pick_next(0), Some(id(3)));
    }
}
