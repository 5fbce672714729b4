//! Máquina simulada para os testes de cenário.
//!
//! Monta o núcleo sobre a HAL hospedada: CPUs como threads, scheduler com
//! round-robin e, opcionalmente, RAM simulada com PMM, VMM e swap em RAM.
//!
//! A thread do teste é a CPU 0 e também a idle dela: só roda quando nenhuma
//! tarefa da CPU 0 está pronta. Tarefas dos testes sempre cedem ou dormem.

use crate::arch::hosted::{enter_cpu, PhysArena, ThreadStarter};
use crate::core::config::DEFAULT_TIMESLICE;
use crate::core::smp::{Smp, TickKind};
use crate::core::time::Clock;
use crate::mm::pmm::{MemoryRegion, MemoryRegionType, Pmm, Reclaim};
use crate::mm::swap::MemorySwap;
use crate::mm::{PhysAddr, Vmm};
use crate::sched::{RoundRobin, Scheduler};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

/// Voltas do loop idle antes de um `run_until` desistir.
const MAX_SPINS: usize = 50_000;

/// RAM simulada: 16 MiB..24 MiB, toda na zona Normal.
pub const RAM_BASE: u64 = 16 * 1024 * 1024;
pub const RAM_SIZE: usize = 8 * 1024 * 1024;
pub const SWAP_SLOTS: usize = 256;

/// PMM + VMM + swap sobre uma arena do host.
pub struct Memory {
    pub vmm: Arc<Vmm>,
    pub pmm: Arc<Pmm>,
    pub swap: Arc<MemorySwap>,
    // Por último: PMM e VMM apontam para dentro da arena
    _arena: PhysArena,
}

impl Memory {
    pub fn new(smp: Arc<Smp>) -> Self {
        let arena = PhysArena::new(PhysAddr::new(RAM_BASE), RAM_SIZE);
        let regions = [MemoryRegion::new(RAM_BASE, RAM_SIZE as u64, MemoryRegionType::Usable)];
        let pmm = Arc::new(Pmm::new(arena.linear_map(), &regions, &[]).expect("PMM"));
        let vmm = Arc::new(Vmm::new(pmm.clone(), smp, None));
        let swap = Arc::new(MemorySwap::new(SWAP_SLOTS));
        vmm.set_swap(swap.clone());
        let reclaim: Weak<dyn Reclaim> = Arc::downgrade(&vmm) as Weak<dyn Reclaim>;
        pmm.set_reclaim(reclaim);
        Self {
            vmm,
            pmm,
            swap,
            _arena: arena,
        }
    }
}

pub struct Machine {
    pub smp: Arc<Smp>,
    pub clock: Arc<Clock>,
    pub sched: Arc<Scheduler>,
    pub mem: Option<Memory>,
    starter: ThreadStarter,
}

impl Machine {
    /// Sobe `nr_cpus` CPUs, cada AP no loop idle do scheduler.
    pub fn new(nr_cpus: usize) -> Self {
        enter_cpu(0);
        let smp = Arc::new(Smp::new(nr_cpus));
        smp.mark_boot_cpu_online(0);
        let clock = Arc::new(Clock::new(100));
        let sched = Arc::new(Scheduler::new(
            smp.clone(),
            clock.clone(),
            Box::new(RoundRobin::new(nr_cpus, DEFAULT_TIMESLICE)),
        ));
        sched.init_cpu();

        let starter = ThreadStarter::new();
        for cpu in 1..nr_cpus {
            let ap = sched.clone();
            let booted = smp.boot_secondary(
                &starter,
                cpu,
                Box::new(move || {
                    ap.init_cpu();
                    assert!(ap.smp().mark_online(cpu));
                    ap.idle_loop();
                }),
            );
            assert!(booted.is_ok(), "AP não subiu");
        }

        Self {
            smp,
            clock,
            sched,
            mem: None,
            starter,
        }
    }

    /// Como `new`, com memória simulada ligada ao scheduler.
    pub fn with_memory(nr_cpus: usize) -> Self {
        let mut machine = Self::new(nr_cpus);
        let mem = Memory::new(machine.smp.clone());
        machine.sched.set_mm_context(mem.vmm.clone());
        machine.mem = Some(mem);
        machine
    }

    pub fn vmm(&self) -> &Arc<Vmm> {
        &self.mem.as_ref().expect("máquina sem memória").vmm
    }

    /// Roda a idle da CPU 0 até `cond` valer.
    pub fn run_until(&self, cond: impl Fn() -> bool) {
        for _ in 0..MAX_SPINS {
            if cond() {
                return;
            }
            self.sched.idle_once();
        }
        panic!("condição não atingida");
    }

    /// Como `run_until`, com um tick de timer por volta.
    pub fn tick_until(&self, cond: impl Fn() -> bool) {
        for _ in 0..MAX_SPINS {
            if cond() {
                return;
            }
            self.sched.tick(TickKind::Idle);
            self.sched.idle_once();
        }
        panic!("condição não atingida");
    }

    /// Dá `n` voltas no loop idle (deixa as outras tarefas andarem).
    pub fn settle(&self, n: usize) {
        for _ in 0..n {
            self.sched.idle_once();
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.smp.stop_others();
        // Com o teste já em pânico uma AP pode estar presa numa tarefa
        if !std::thread::panicking() {
            self.starter.join_all();
        }
    }
}
