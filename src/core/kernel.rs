/// Arquivo: core/kernel.rs
///
/// Propósito: Composição do núcleo e roteamento de traps.
/// Os subsistemas são objetos explícitos construídos no boot; `Kernel` os
/// junta e decide, para cada vetor, quem atende: VMM (page fault),
/// scheduler (sinais, tick, reescalonamento), linhas de IRQ, IPIs ou a
/// tabela de syscalls.
///
/// Detalhes de Implementação:
/// - No bare-metal a instância vive num `spin::Once` lido pelo stub de
///   entrada; nos testes cada máquina simulada monta a sua.
/// - Handler de IRQ e IPI rodam entre `irq_enter`/`irq_exit`; exceções e
///   syscalls não contam como contexto de IRQ.
/// - Exceção fatal vira `panic!`, que para as outras CPUs.

use crate::arch::{Cpu, CpuOps};
use crate::core::config::KernelConfig;
use crate::core::irq::dispatch::{exit_action, irq_enter, irq_exit};
use crate::core::irq::{
    exception_action, Delivery, Exception, ExceptionAction, ExitAction, InterruptFrame, IrqChip,
    IrqContext, IrqError, IrqLines, IrqReturn, Trap, Trigger,
};
use crate::core::smp::{Smp, TickKind};
use crate::core::time::Clock;
use crate::core::work::DeferredWork;
use crate::mm::{audit, FaultError, FaultResult, VirtAddr, Vmm};
use crate::sched::{Scheduler, Task};
use crate::sys::{Signal, SysResult};
use crate::syscall::{register_core, SyscallEnv, SyscallTable};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

/// Contadores do roteamento (o resto fica nos próprios subsistemas).
#[derive(Debug, Default)]
pub struct TrapStats {
    /// Vetor espúrio do APIC
    pub spurious: AtomicU64,
    pub unknown: AtomicU64,
    pub page_faults: AtomicU64,
    pub audits: AtomicU64,
    pub audit_failures: AtomicU64,
}

pub struct Kernel {
    pub config: KernelConfig,
    pub smp: Arc<Smp>,
    pub clock: Arc<Clock>,
    pub sched: Arc<Scheduler>,
    pub vmm: Arc<Vmm>,
    pub irq: IrqLines,
    pub syscalls: SyscallTable,
    pub stats: Arc<TrapStats>,
}

impl Kernel {
    /// Junta os subsistemas já construídos e instala as syscalls do núcleo.
    pub fn new(
        config: KernelConfig,
        sched: Arc<Scheduler>,
        vmm: Arc<Vmm>,
        chip: Arc<dyn IrqChip>,
    ) -> SysResult<Arc<Self>> {
        let syscalls = SyscallTable::new();
        register_core(&syscalls)?;
        sched.set_mm_context(vmm.clone());
        Ok(Arc::new(Self {
            config,
            smp: sched.smp().clone(),
            clock: sched.clock().clone(),
            sched,
            vmm,
            irq: IrqLines::new(chip),
            syscalls,
            stats: Arc::new(TrapStats::default()),
        }))
    }

    /// Liga o tick do scheduler à linha `line` do timer.
    ///
    /// Com `audit_interval > 0`, a CPU 0 agenda uma auditoria do MM a cada
    /// `audit_interval` ticks (roda como trabalho diferido, fora do handler).
    pub fn install_timer(&self, line: u8) -> Result<(), IrqError> {
        let sched = self.sched.clone();
        let vmm = self.vmm.clone();
        let stats = self.stats.clone();
        let interval = self.config.audit_interval;

        let handler = move |ctx: IrqContext| {
            let cpu = sched.smp().cpu(ctx.cpu);
            let kind = if ctx.from_user {
                TickKind::User
            } else if cpu.current_raw() == cpu.idle_raw() {
                TickKind::Idle
            } else {
                TickKind::System
            };
            sched.tick(kind);

            if interval > 0 && ctx.cpu == 0 && sched.clock().now() % interval == 0 {
                let vmm = vmm.clone();
                let stats = stats.clone();
                // Fila cheia: a auditoria fica para o próximo intervalo
                let _ = cpu.deferred.defer(DeferredWork::Task(Arc::new(move || {
                    stats.audits.fetch_add(1, Ordering::Relaxed);
                    if !audit::audit_and_log(&vmm) {
                        stats.audit_failures.fetch_add(1, Ordering::Relaxed);
                    }
                })));
            }
            IrqReturn::Handled
        };

        self.irq.request_irq(line, "timer", Trigger::Edge, Arc::new(handler))
    }

    /// Atende um trap e devolve o que fazer antes do `iret`.
    pub fn handle_trap(&self, frame: &mut InterruptFrame) -> ExitAction {
        let cpu = self.smp.this_cpu();

        match Trap::classify(frame.vector()) {
            Trap::Exception(exc) => {
                self.handle_exception(exc, frame);
                exit_action(cpu, frame)
            }
            Trap::Irq(line) => {
                irq_enter(cpu);
                let ctx = IrqContext {
                    line,
                    cpu: cpu.id(),
                    from_user: frame.from_user(),
                };
                if self.irq.handle(ctx) == Delivery::Spurious {
                    crate::ktrace!("(IRQ) Espúria na linha ", line);
                }
                irq_exit(cpu, frame).1
            }
            Trap::Ipi(_) => {
                irq_enter(cpu);
                self.smp.handle_ipis();
                irq_exit(cpu, frame).1
            }
            Trap::Syscall => {
                let env = SyscallEnv { sched: &self.sched };
                self.syscalls.dispatch(&env, frame);
                exit_action(cpu, frame)
            }
            Trap::Spurious => {
                self.stats.spurious.fetch_add(1, Ordering::Relaxed);
                ExitAction::Return
            }
            Trap::Unknown(vector) => {
                self.stats.unknown.fetch_add(1, Ordering::Relaxed);
                crate::kwarn!("(IRQ) Vetor sem dono: ", vector);
                ExitAction::Return
            }
        }
    }

    /// `handle_trap` seguido do reescalonamento pedido na saída.
    pub fn trap(&self, frame: &mut InterruptFrame) {
        if self.handle_trap(frame) == ExitAction::Reschedule {
            self.sched.schedule();
        }
    }

    fn handle_exception(&self, exc: Exception, frame: &InterruptFrame) {
        let in_irq = self.smp.this_cpu().in_irq();
        match exception_action(exc, frame.from_user(), in_irq) {
            ExceptionAction::PageFault => self.page_fault(frame),
            ExceptionAction::Signal(sig) => {
                crate::kdebug!("(Trap) Exceção de usuário vetor=", frame.vector(), " eip=", frame.eip);
                self.signal_current(sig, exc);
            }
            ExceptionAction::Log => {
                crate::kinfo!("(Trap) Exceção ignorada vetor=", frame.vector(), " eip=", frame.eip);
            }
            ExceptionAction::Fatal => fatal(exc, frame),
        }
    }

    fn page_fault(&self, frame: &InterruptFrame) {
        self.stats.page_faults.fetch_add(1, Ordering::Relaxed);
        let va = VirtAddr::new(Cpu::read_cr2());
        let error = FaultError::from_bits_truncate(frame.error);
        let task = self.sched.try_current();

        let result = match task.as_ref().and_then(|t| t.aspace()) {
            Some(asid) => self.vmm.fault(asid, va, error),
            // Thread de kernel sem address space: nada a resolver
            None if frame.from_user() => FaultResult::Signal(Signal::SigSegv),
            None => FaultResult::Fatal,
        };

        match result {
            FaultResult::Handled => {}
            FaultResult::Signal(sig) => {
                crate::kdebug!("(VMM) Fault não resolvido va=", va.as_u32(), " erro=", frame.error);
                self.signal_current(sig, Exception::PageFault);
            }
            FaultResult::Fatal => {
                crate::kerror!("(VMM) Page fault fatal va=", va.as_u32(), " eip=", frame.eip);
                fatal(Exception::PageFault, frame);
            }
        }
    }

    fn signal_current(&self, sig: Signal, exc: Exception) {
        let Some(task) = self.sched.try_current() else {
            panic!("(Trap) {} sem tarefa corrente", exc.name());
        };
        deliver(&self.sched, &task, sig);
    }
}

fn deliver(sched: &Scheduler, task: &Task, sig: Signal) {
    if sched.send_signal(task.id(), sig).is_err() {
        crate::kwarn!("(Trap) Sinal para tarefa inexistente pid=", task.id().pid());
    }
}

fn fatal(exc: Exception, frame: &InterruptFrame) -> ! {
    panic!(
        "(Trap) {} no kernel: eip={:#x} erro={:#x}",
        exc.name(),
        frame.eip,
        frame.error
    );
}

// =============================================================================
// INSTÂNCIA GLOBAL (stub de entrada do bare-metal)
// =============================================================================

static KERNEL: spin::Once<Arc<Kernel>> = spin::Once::new();

/// Publica o núcleo montado. Só a primeira chamada tem efeito.
pub fn install(kernel: Arc<Kernel>) -> &'static Arc<Kernel> {
    KERNEL.call_once(|| kernel)
}

pub fn get() -> Option<&'static Arc<Kernel>> {
    KERNEL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::set_cr2;
    use crate::core::irq::chip::recording::{Op, RecordingChip};
    use crate::core::irq::vectors;
    use crate::core::smp::IpiReason;
    use crate::klib::testkit::Machine;
    use crate::mm::{Protection, Translation, Vma};
    use crate::sched::SpawnOptions;
    use crate::syscall::numbers::SYS_GETPID;
    use std::sync::atomic::AtomicBool;

    fn boot(config: KernelConfig) -> (Machine, Arc<RecordingChip>, Arc<Kernel>) {
        let rig = Machine::with_memory(1);
        let chip = Arc::new(RecordingChip::default());
        let kernel = Kernel::new(config, rig.sched.clone(), rig.vmm().clone(), chip.clone()).unwrap();
        (rig, chip, kernel)
    }

    #[test]
    fn timer_irq_ticks_and_eois() {
        let (rig, chip, kernel) = boot(KernelConfig::default());
        kernel.install_timer(0).unwrap();
        chip.take();

        let before = rig.clock.now();
        let mut frame = InterruptFrame::kernel(vectors::IRQ_TIMER);
        assert_eq!(kernel.handle_trap(&mut frame), ExitAction::Return);

        assert_eq!(rig.clock.now(), before + 1);
        assert_eq!(chip.take(), [Op::Ack(0), Op::Eoi(0)]);
        assert_eq!(kernel.irq.stats(0).unwrap().count, 1);
        assert!(!rig.smp.this_cpu().in_irq());
    }

    #[test]
    fn audit_runs_as_deferred_work_on_irq_exit() {
        let config = KernelConfig {
            audit_interval: 2,
            ..KernelConfig::default()
        };
        let (rig, _chip, kernel) = boot(config);
        kernel.install_timer(0).unwrap();

        let start = rig.clock.now();
        for _ in 0..4 {
            let mut frame = InterruptFrame::kernel(vectors::IRQ_TIMER);
            kernel.handle_trap(&mut frame);
        }
        let expected = (start + 1..=start + 4).filter(|t| t % 2 == 0).count() as u64;
        assert_eq!(kernel.stats.audits.load(Ordering::Relaxed), expected);
        assert_eq!(kernel.stats.audit_failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn syscall_trap_writes_eax() {
        let (rig, _chip, kernel) = boot(KernelConfig::default());
        let mut frame = InterruptFrame::user(vectors::SYSCALL);
        frame.eax = SYS_GETPID as u32;
        kernel.handle_trap(&mut frame);
        assert_eq!(frame.eax, rig.sched.current_id().pid());

        frame.eax = 399;
        kernel.handle_trap(&mut frame);
        assert_eq!(frame.eax as i32, -38);
    }

    #[test]
    fn reschedule_ipi_forces_resched_on_return_to_user() {
        let (rig, _chip, kernel) = boot(KernelConfig::default());
        let cpu = rig.smp.this_cpu();

        rig.smp.send_ipi(0, IpiReason::Reschedule);
        let mut frame = InterruptFrame::user(IpiReason::Reschedule.vector());
        assert_eq!(kernel.handle_trap(&mut frame), ExitAction::Reschedule);
        assert!(cpu.clear_need_resched());

        // Voltando para o kernel a flag fica para o próximo ponto de escalonamento
        rig.smp.send_ipi(0, IpiReason::Reschedule);
        let mut frame = InterruptFrame::kernel(IpiReason::Reschedule.vector());
        assert_eq!(kernel.handle_trap(&mut frame), ExitAction::Return);
        assert!(cpu.clear_need_resched());
    }

    #[test]
    fn stray_vectors_are_counted() {
        let (_rig, _chip, kernel) = boot(KernelConfig::default());
        kernel.handle_trap(&mut InterruptFrame::kernel(vectors::SPURIOUS));
        kernel.handle_trap(&mut InterruptFrame::kernel(0x70));
        assert_eq!(kernel.stats.spurious.load(Ordering::Relaxed), 1);
        assert_eq!(kernel.stats.unknown.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn user_page_faults_resolve_or_signal() {
        let (rig, _chip, kernel) = boot(KernelConfig::default());
        let asid = kernel.vmm.create_space().unwrap();
        kernel
            .vmm
            .map_region(asid, Vma::anonymous(0x40_0000, 0x40_4000, Protection::RW))
            .unwrap();

        let ok = Arc::new(AtomicBool::new(false));
        let (k, done) = (kernel.clone(), ok.clone());
        let opts = SpawnOptions {
            aspace: Some(asid),
            ..SpawnOptions::named("user")
        };
        let id = rig
            .sched
            .spawn_with(opts, move || {
                let user_pf = |addr: u32| {
                    set_cr2(addr);
                    let error = (FaultError::USER | FaultError::WRITE).bits();
                    InterruptFrame::user(vectors::PAGE_FAULT).with_error(error)
                };

                k.handle_trap(&mut user_pf(0x40_1000));
                let mapped = matches!(
                    k.vmm.translate(asid, VirtAddr::new(0x40_1000)),
                    Ok(Translation::Mapped { .. })
                );

                k.handle_trap(&mut user_pf(0x80_0000));
                let me = k.sched.current();
                let segv = me.signals.contains(Signal::SigSegv);

                k.handle_trap(&mut InterruptFrame::user(vectors::DIVIDE_ERROR));
                let fpe = me.signals.contains(Signal::SigFpe);

                done.store(mapped && segv && fpe, Ordering::SeqCst);
            })
            .unwrap();

        assert!(rig.sched.wait_for(id).is_ok());
        assert!(ok.load(Ordering::SeqCst));
        assert_eq!(kernel.stats.page_faults.load(Ordering::Relaxed), 2);
    }

    #[test]
    #[should_panic(expected = "GPF no kernel")]
    fn kernel_gp_is_fatal() {
        let (_rig, _chip, kernel) = boot(KernelConfig::default());
        let mut frame = InterruptFrame::kernel(vectors::GENERAL_PROTECTION).with_error(0);
        kernel.handle_trap(&mut frame);
    }

    #[test]
    #[should_panic(expected = "PAGE FAULT no kernel")]
    fn kernel_page_fault_without_space_is_fatal() {
        let (_rig, _chip, kernel) = boot(KernelConfig::default());
        set_cr2(0xDEAD_0000);
        let mut frame = InterruptFrame::kernel(vectors::PAGE_FAULT);
        kernel.handle_trap(&mut frame);
    }
}
