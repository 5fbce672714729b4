/// Arquivo: core/smp/ipi.rs
///
/// Propósito: Interrupções Inter-Processador (IPIs).
/// Um motivo pendente é um bit em `CpuData::ipi_pending`; o vetor de
/// hardware só acorda a CPU. O tratador troca o bitmap por zero e atende
/// cada motivo, esvaziando as filas correspondentes.
///
/// Detalhes de Implementação:
/// - Se o bit já estava pendente, a IPI de hardware não é reenviada: o alvo
///   ainda vai atender o motivo e ver tudo que foi enfileirado antes.
/// - RESCHEDULE é idempotente: só liga `need_resched`.

use super::Smp;
use crate::arch::{Cpu, CpuId, CpuOps};
use crate::core::irq::vectors;
use crate::mm::config::{PAGE_SIZE, TLB_FLUSH_THRESHOLD};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Motivos de IPI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpiReason {
    /// Força o scheduler a rodar
    Reschedule = 0,
    /// Executa chamadas da fila de chamadas cruzadas
    CallFunction = 1,
    /// Invalida um intervalo da TLB
    TlbInvalidate = 2,
    /// Para a CPU (pânico)
    Stop = 3,
}

impl IpiReason {
    pub const ALL: [Self; 4] = [
        Self::Reschedule,
        Self::CallFunction,
        Self::TlbInvalidate,
        Self::Stop,
    ];

    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub const fn vector(self) -> u8 {
        match self {
            Self::Reschedule => vectors::IPI_RESCHEDULE,
            Self::CallFunction => vectors::IPI_CALL_FUNCTION,
            Self::TlbInvalidate => vectors::IPI_TLB_INVALIDATE,
            Self::Stop => vectors::IPI_STOP,
        }
    }

    pub fn from_vector(vector: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.vector() == vector)
    }
}

/// Pedido de invalidação de TLB entregue a outras CPUs.
pub struct TlbRequest {
    /// Address space afetado (0 = mapeamentos do kernel, sempre invalida)
    pub space: u64,
    pub start: u32,
    pub end: u32,
    remaining: AtomicUsize,
}

impl TlbRequest {
    pub fn new(space: u64, start: u32, end: u32, targets: usize) -> Self {
        Self {
            space,
            start,
            end,
            remaining: AtomicUsize::new(targets),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    fn ack(&self) {
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Invalida `[start, end)` na TLB local.
pub fn invalidate_local(start: u32, end: u32) {
    let pages = ((end - start) as usize).div_ceil(PAGE_SIZE);
    if pages > TLB_FLUSH_THRESHOLD {
        Cpu::flush_tlb_local();
        return;
    }
    for i in 0..pages {
        // SAFETY: invlpg só descarta entradas em cache
        unsafe { Cpu::invlpg(start + (i * PAGE_SIZE) as u32) };
    }
}

/// O que uma rodada de `handle_ipis` atendeu.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpiSummary {
    pub reschedule: bool,
    pub calls: usize,
    pub tlb: usize,
}

impl Smp {
    /// Marca `reason` pendente em `target` e envia o vetor se necessário.
    pub fn send_ipi(&self, target: CpuId, reason: IpiReason) {
        let cpu = self.cpu(target);
        let before = cpu.ipi_pending.fetch_or(reason.bit(), Ordering::AcqRel);
        if before & reason.bit() == 0 {
            Cpu::send_ipi(target, reason.vector());
        }
    }

    /// Pede reescalonamento de `target` (local: só liga a flag).
    pub fn send_reschedule(&self, target: CpuId) {
        if target == Cpu::current_id() {
            self.cpu(target).set_need_resched();
        } else {
            self.send_ipi(target, IpiReason::Reschedule);
        }
    }

    /// Atende todos os motivos pendentes da CPU atual.
    ///
    /// Chamado pelo vetor de IPI, pelo loop idle e por quem espera ativamente
    /// outras CPUs (evita deadlock de chamadas cruzadas mútuas).
    pub fn handle_ipis(&self) -> IpiSummary {
        let me = Cpu::current_id();
        let cpu = self.cpu(me);
        let pending = cpu.ipi_pending.swap(0, Ordering::AcqRel);
        let mut summary = IpiSummary::default();
        if pending == 0 {
            return summary;
        }
        cpu.count_ipi();

        if pending & IpiReason::Reschedule.bit() != 0 {
            cpu.set_need_resched();
            summary.reschedule = true;
        }
        if pending & IpiReason::TlbInvalidate.bit() != 0 {
            summary.tlb = self.run_tlb_requests(me);
        }
        if pending & IpiReason::CallFunction.bit() != 0 {
            summary.calls = self.run_calls(me);
        }
        if pending & IpiReason::Stop.bit() != 0 {
            crate::kwarn!("(SMP) STOP recebido na CPU ", me);
            self.online.clear(me);
            cpu.set_state(super::CpuState::Stopped);
            Cpu::hang();
        }
        summary
    }

    fn run_tlb_requests(&self, me: CpuId) -> usize {
        let cpu = self.cpu(me);
        let mut done = 0;
        loop {
            let Some(req) = cpu.tlb_requests.lock_irqsave().pop_front() else {
                return done;
            };
            // Quem não tem o address space carregado já descartou a TLB no CR3
            if req.space == 0 || cpu.loaded_space() == req.space {
                invalidate_local(req.start, req.end);
            }
            req.ack();
            done += 1;
        }
    }

    /// Invalida `[start, end)` de `space` nas CPUs `targets` e espera todas
    /// confirmarem. A CPU atual nunca é alvo (o chamador invalida localmente).
    pub fn tlb_shootdown(&self, targets: super::CpuMask, space: u64, start: u32, end: u32) {
        let me = Cpu::current_id();
        let targets = targets.without(me).and(self.online_mask());
        if targets.is_empty() {
            return;
        }

        let req = alloc::sync::Arc::new(TlbRequest::new(space, start, end, targets.count()));
        for cpu in targets.iter() {
            self.cpu(cpu).tlb_requests.lock_irqsave().push_back(req.clone());
            self.send_ipi(cpu, IpiReason::TlbInvalidate);
        }
        crate::ktrace!("(SMP) shootdown enviado, alvos=", targets.bits());

        while req.remaining() > 0 {
            self.handle_ipis();
            Cpu::pause();
        }
    }
}
