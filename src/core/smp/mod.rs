/// Arquivo: core/smp/mod.rs
///
/// Propósito: Módulo de Multiprocessamento Simétrico (SMP).
/// Gerencia dados por CPU, IPIs, chamadas cruzadas, shootdown de TLB e a
/// partida das CPUs secundárias.
///
/// Módulos contidos:
/// - `cpumask`: Conjuntos de CPUs.
/// - `percpu`: Dados por CPU.
/// - `ipi`: Motivos de IPI e tratador.
/// - `call`: `smp_call`.
/// - `bringup`: Inicialização de APs (Application Processors).

pub mod bringup;
pub mod call;
pub mod cpumask;
pub mod ipi;
pub mod percpu;

pub use bringup::SecondaryStart;
pub use cpumask::{AtomicCpuMask, CpuMask};
pub use ipi::{IpiReason, IpiSummary};
pub use percpu::{CpuData, CpuState, TickKind};

use crate::arch::{Cpu, CpuId, CpuOps};
use crate::core::config::MAX_CPUS;
use crate::sys::error::Errno;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// Erros do subsistema SMP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpError {
    /// CPU alvo não está online
    Offline(CpuId),
    /// Índice além das CPUs configuradas
    InvalidCpu,
    /// CPU não está `Offline`
    AlreadyStarted,
    /// Plataforma não conseguiu disparar a CPU
    StartFailed,
    /// A CPU não reportou dentro do prazo
    Timeout,
}

impl SmpError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline(_) => "CPU alvo offline",
            Self::InvalidCpu => "CPU inexistente",
            Self::AlreadyStarted => "CPU já iniciada",
            Self::StartFailed => "Falha ao disparar CPU",
            Self::Timeout => "CPU não respondeu",
        }
    }
}

impl fmt::Display for SmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<SmpError> for Errno {
    fn from(err: SmpError) -> Self {
        match err {
            SmpError::Offline(_) | SmpError::InvalidCpu => Errno::ENXIO,
            SmpError::AlreadyStarted => Errno::EBUSY,
            SmpError::StartFailed => Errno::EIO,
            SmpError::Timeout => Errno::ETIMEDOUT,
        }
    }
}

/// Estado SMP do sistema: tabela por CPU e máscara online.
pub struct Smp {
    cpus: Box<[CpuData]>,
    online: AtomicCpuMask,
}

impl Smp {
    pub fn new(nr_cpus: usize) -> Self {
        let nr = nr_cpus.clamp(1, MAX_CPUS);
        let cpus: Vec<CpuData> = (0..nr).map(CpuData::new).collect();
        Self {
            cpus: cpus.into_boxed_slice(),
            online: AtomicCpuMask::new(),
        }
    }

    pub fn nr_cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Dados da CPU `id`. Um id fora da tabela é violação de invariante.
    pub fn cpu(&self, id: CpuId) -> &CpuData {
        &self.cpus[id]
    }

    pub fn this_cpu(&self) -> &CpuData {
        self.cpu(Cpu::current_id())
    }

    pub fn online_mask(&self) -> CpuMask {
        self.online.load()
    }

    pub fn is_online(&self, cpu: CpuId) -> bool {
        self.online.contains(cpu)
    }

    pub fn cpus(&self) -> impl Iterator<Item = &CpuData> {
        self.cpus.iter()
    }
}

#[cfg(test)]
mod test;
