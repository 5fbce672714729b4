//! CPU Bringup - Inicialização de CPUs secundárias (AP)
//!
//! Máquina de estados por CPU: `Offline → Starting → Online → Stopped`.
//! O BSP marca a AP como `Starting`, pede à plataforma que a dispare
//! (INIT/SIPI no x86, thread na HAL simulada) e espera ela se declarar
//! online. Sem resposta dentro do prazo a CPU volta a `Offline`.

use super::{CpuState, Smp, SmpError};
use crate::arch::{Cpu, CpuId, CpuOps};
use crate::core::config::AP_BOOT_TIMEOUT_SPINS;
use alloc::boxed::Box;

/// Mecanismo de plataforma que dispara uma CPU secundária.
pub trait SecondaryStart: Send + Sync {
    /// Faz a CPU `cpu` executar `entry`. `false` se o disparo falhou.
    fn start(&self, cpu: CpuId, entry: Box<dyn FnOnce() + Send>) -> bool;
}

impl Smp {
    /// Marca a CPU de boot online (não passa por `Starting`).
    pub fn mark_boot_cpu_online(&self, cpu: CpuId) {
        self.cpu(cpu).set_state(CpuState::Online);
        self.online.set(cpu);
    }

    /// Chamado pela própria AP. Devolve `false` se o BSP já desistiu dela.
    pub fn mark_online(&self, cpu: CpuId) -> bool {
        let ok = self.cpu(cpu).transition(CpuState::Starting, CpuState::Online);
        if ok {
            self.online.set(cpu);
        }
        ok
    }

    /// Dispara a AP `cpu` e espera ela reportar online.
    pub fn boot_secondary(
        &self,
        starter: &dyn SecondaryStart,
        cpu: CpuId,
        entry: Box<dyn FnOnce() + Send>,
    ) -> Result<(), SmpError> {
        if cpu >= self.nr_cpus() {
            return Err(SmpError::InvalidCpu);
        }
        let data = self.cpu(cpu);
        if !data.transition(CpuState::Offline, CpuState::Starting) {
            return Err(SmpError::AlreadyStarted);
        }

        if !starter.start(cpu, entry) {
            data.set_state(CpuState::Offline);
            crate::kerror!("(SMP) Falha ao disparar CPU ", cpu);
            return Err(SmpError::StartFailed);
        }

        for _ in 0..AP_BOOT_TIMEOUT_SPINS {
            if data.state() == CpuState::Online {
                crate::kinfo!("(SMP) CPU online: ", cpu);
                return Ok(());
            }
            Cpu::pause();
        }

        if data.transition(CpuState::Starting, CpuState::Offline) {
            crate::kwarn!("(SMP) Timeout esperando CPU ", cpu);
            return Err(SmpError::Timeout);
        }
        // Reportou entre a última checagem e o CAS
        Ok(())
    }

    /// Manda STOP para todas as outras CPUs online (caminho de pânico).
    pub fn stop_others(&self) {
        let me = Cpu::current_id();
        for cpu in self.online_mask().without(me).iter() {
            self.send_ipi(cpu, super::IpiReason::Stop);
        }
    }
}
