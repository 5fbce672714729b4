/// Arquivo: x86/apic.rs
///
/// Propósito: Local APIC e I/O APIC.
/// - LAPIC (um por CPU): identidade da CPU, EOI e envio de IPIs (ICR).
/// - IOAPIC: roteia as linhas externas para vetores `IRQ_BASE + linha`;
///   implementa `IrqChip`, substituindo o 8259 quando presente.
///
/// Detalhes de Implementação:
/// - As duas janelas (0xFEC00000 e 0xFEE00000) caem na mesma página de
///   4 MiB mapeada em identidade, sem cache, pelo diretório de boot.
/// - `CpuId` lógico ≠ APIC ID: a tradução fica em duas tabelas atômicas,
///   preenchidas no boot de cada CPU.
/// - IOREGSEL/IOWIN é um par seleciona-e-acessa: o acesso vai sob lock.

use super::cpu::Cpu;
use crate::arch::mmio::MmioRegion;
use crate::arch::CpuId;
use crate::core::config::MAX_CPUS;
use crate::core::irq::vectors::{IRQ_BASE, SPURIOUS};
use crate::core::irq::{IrqChip, IrqError, Trigger};
use crate::core::smp::CpuMask;
use crate::sync::{LockRank, Spinlock};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Once;

pub const LAPIC_PHYS: u32 = 0xFEE0_0000;
pub const IOAPIC_PHYS: u32 = 0xFEC0_0000;

const IA32_APIC_BASE_MSR: u32 = 0x1B;
const APIC_GLOBAL_ENABLE: u64 = 1 << 11;

// Offsets MMIO do LAPIC
const REG_ID: usize = 0x020;
const REG_EOI: usize = 0x0B0;
const REG_SVR: usize = 0x0F0;
const REG_ESR: usize = 0x280;
const REG_ICR_LOW: usize = 0x300;
const REG_ICR_HIGH: usize = 0x310;
const REG_LVT_TIMER: usize = 0x320;
const LAPIC_WINDOW: usize = 0x400;

const SVR_SOFT_ENABLE: u32 = 1 << 8;
const LVT_MASKED: u32 = 1 << 16;
const ICR_DELIVERY_PENDING: u32 = 1 << 12;
const ICR_LEVEL_ASSERT: u32 = 1 << 14;
const ICR_INIT: u32 = 0b101 << 8;
const ICR_STARTUP: u32 = 0b110 << 8;

const NO_CPU: u8 = 0xFF;

static LAPIC: Once<Lapic> = Once::new();
static APIC_OF_CPU: [AtomicU8; MAX_CPUS] = [const { AtomicU8::new(0) }; MAX_CPUS];
static CPU_OF_APIC: [AtomicU8; 256] = [const { AtomicU8::new(NO_CPU) }; 256];

/// Local APIC da CPU que executa (a janela é a mesma em todas).
pub struct Lapic {
    regs: MmioRegion,
}

impl Lapic {
    /// Liga o LAPIC desta CPU: enable global (MSR), SVR com o vetor
    /// espúrio, timer local mascarado.
    ///
    /// # Safety
    /// Ring 0, janela do LAPIC mapeada.
    unsafe fn enable(&self) {
        let base = Cpu::read_msr(IA32_APIC_BASE_MSR);
        if base & APIC_GLOBAL_ENABLE == 0 {
            Cpu::write_msr(IA32_APIC_BASE_MSR, base | APIC_GLOBAL_ENABLE);
        }
        self.regs.write(REG_SVR, SVR_SOFT_ENABLE | SPURIOUS as u32);
        self.regs.write(REG_LVT_TIMER, LVT_MASKED);
        self.regs.write(REG_ESR, 0);
        self.regs.write(REG_ESR, 0);
        self.eoi();
    }

    pub fn id(&self) -> u8 {
        (self.regs.read(REG_ID) >> 24) as u8
    }

    pub fn eoi(&self) {
        self.regs.write(REG_EOI, 0);
    }

    fn wait_icr(&self) {
        while self.regs.read(REG_ICR_LOW) & ICR_DELIVERY_PENDING != 0 {
            core::hint::spin_loop();
        }
    }

    fn send(&self, apic_id: u8, command: u32) {
        self.wait_icr();
        self.regs.write(REG_ICR_HIGH, (apic_id as u32) << 24);
        self.regs.write(REG_ICR_LOW, command);
    }

    pub fn send_fixed(&self, apic_id: u8, vector: u8) {
        self.send(apic_id, ICR_LEVEL_ASSERT | vector as u32);
    }

    pub fn send_init(&self, apic_id: u8) {
        self.send(apic_id, ICR_LEVEL_ASSERT | ICR_INIT);
    }

    /// SIPI: a AP começa em modo real em `page * 4096`.
    pub fn send_startup(&self, apic_id: u8, page: u8) {
        self.send(apic_id, ICR_STARTUP | page as u32);
    }
}

fn register_cpu(cpu: CpuId, apic_id: u8) {
    APIC_OF_CPU[cpu].store(apic_id, Ordering::Release);
    CPU_OF_APIC[apic_id as usize].store(cpu as u8, Ordering::Release);
}

/// Liga o LAPIC do BSP e o registra como CPU 0.
///
/// # Safety
/// Uma vez, no BSP, com a janela do LAPIC mapeada.
pub unsafe fn init_bsp() {
    let lapic = LAPIC.call_once(|| Lapic {
        regs: MmioRegion::new(NonNull::new_unchecked(LAPIC_PHYS as *mut u32), LAPIC_WINDOW),
    });
    lapic.enable();
    register_cpu(0, lapic.id());
    crate::kinfo!("(APIC) LAPIC do BSP id=", lapic.id());
}

/// Liga o LAPIC de uma AP. O BSP já associou `cpu` ao APIC ID dela.
///
/// # Safety
/// Na própria AP, antes de habilitar interrupções.
pub unsafe fn init_ap() {
    if let Some(lapic) = LAPIC.get() {
        lapic.enable();
    }
}

pub fn lapic() -> Option<&'static Lapic> {
    LAPIC.get()
}

/// Reserva o `CpuId` lógico de uma AP antes do INIT/SIPI.
pub fn assign(cpu: CpuId, apic_id: u8) {
    register_cpu(cpu, apic_id);
}

/// `CpuId` lógico de quem executa (0 antes do LAPIC subir).
pub fn current_cpu() -> CpuId {
    match LAPIC.get() {
        None => 0,
        Some(lapic) => match CPU_OF_APIC[lapic.id() as usize].load(Ordering::Acquire) {
            NO_CPU => 0,
            cpu => cpu as CpuId,
        },
    }
}

pub fn send_ipi(target: CpuId, vector: u8) {
    if let Some(lapic) = LAPIC.get() {
        lapic.send_fixed(APIC_OF_CPU[target].load(Ordering::Acquire), vector);
    }
}

pub fn eoi() {
    if let Some(lapic) = LAPIC.get() {
        lapic.eoi();
    }
}

// =============================================================================
// I/O APIC
// =============================================================================

const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;
const IOAPIC_WINDOW: usize = 0x20;

const IDX_VER: u32 = 0x01;
const IDX_REDTBL: u32 = 0x10;

const REDIR_MASKED: u64 = 1 << 16;
const REDIR_LEVEL: u64 = 1 << 15;
const REDIR_ACTIVE_LOW: u64 = 1 << 13;
const REDIR_DEST_SHIFT: u32 = 56;

pub struct IoApic {
    regs: Spinlock<MmioRegion>,
    lines: u8,
}

impl IoApic {
    /// Mapeia o IOAPIC padrão e mascara todas as entradas, já apontadas
    /// para `IRQ_BASE + linha` no BSP.
    ///
    /// # Safety
    /// Janela do IOAPIC mapeada; chamado uma vez.
    pub unsafe fn init() -> Self {
        let regs = MmioRegion::new(NonNull::new_unchecked(IOAPIC_PHYS as *mut u32), IOAPIC_WINDOW);
        regs.write(IOREGSEL, IDX_VER);
        let max_entry = ((regs.read(IOWIN) >> 16) & 0xFF) as usize + 1;
        let lines = max_entry.min(crate::core::config::NR_IRQS) as u8;

        let chip = Self {
            regs: Spinlock::new(LockRank::IrqChip, regs),
            lines,
        };
        let bsp = APIC_OF_CPU[0].load(Ordering::Acquire) as u64;
        for line in 0..lines {
            let entry = REDIR_MASKED | (bsp << REDIR_DEST_SHIFT) | (IRQ_BASE + line) as u64;
            chip.write_redir(line, entry);
        }
        crate::kinfo!("(APIC) IOAPIC com linhas=", lines);
        chip
    }

    fn write_redir(&self, line: u8, entry: u64) {
        write_redir(&self.regs.lock_irqsave(), line, entry);
    }

    /// Leitura-modificação-escrita de uma entrada sob um único lock.
    fn update(&self, line: u8, f: impl FnOnce(u64) -> u64) {
        let regs = self.regs.lock_irqsave();
        let entry = read_redir(&regs, line);
        write_redir(&regs, line, f(entry));
    }
}

fn read_redir(regs: &MmioRegion, line: u8) -> u64 {
    let index = IDX_REDTBL + 2 * line as u32;
    regs.write(IOREGSEL, index);
    let low = regs.read(IOWIN) as u64;
    regs.write(IOREGSEL, index + 1);
    let high = regs.read(IOWIN) as u64;
    (high << 32) | low
}

fn write_redir(regs: &MmioRegion, line: u8, entry: u64) {
    let index = IDX_REDTBL + 2 * line as u32;
    regs.write(IOREGSEL, index);
    regs.write(IOWIN, entry as u32);
    regs.write(IOREGSEL, index + 1);
    regs.write(IOWIN, (entry >> 32) as u32);
}

impl IrqChip for IoApic {
    fn name(&self) -> &'static str {
        "ioapic"
    }

    fn nr_lines(&self) -> u8 {
        self.lines
    }

    fn mask(&self, line: u8) {
        self.update(line, |e| e | REDIR_MASKED);
    }

    fn unmask(&self, line: u8) {
        self.update(line, |e| e & !REDIR_MASKED);
    }

    // O LAPIC já registrou a entrega
    fn ack(&self, _line: u8) {}

    /// EOI no LAPIC; para linhas por nível o LAPIC repassa ao IOAPIC.
    fn eoi(&self, _line: u8) {
        eoi();
    }

    fn set_affinity(&self, line: u8, cpus: CpuMask) -> Result<(), IrqError> {
        if line >= self.lines {
            return Err(IrqError::InvalidLine);
        }
        // Modo físico: uma CPU de destino
        let cpu = cpus.first().ok_or(IrqError::Unsupported)?;
        let apic_id = APIC_OF_CPU[cpu].load(Ordering::Acquire) as u64;
        self.update(line, |e| (e & !(0xFF << REDIR_DEST_SHIFT)) | (apic_id << REDIR_DEST_SHIFT));
        Ok(())
    }

    fn set_type(&self, line: u8, trigger: Trigger) -> Result<(), IrqError> {
        if line >= self.lines {
            return Err(IrqError::InvalidLine);
        }
        // ISA: borda, ativo alto. PCI: nível, ativo baixo.
        self.update(line, |e| match trigger {
            Trigger::Edge => e & !(REDIR_LEVEL | REDIR_ACTIVE_LOW),
            Trigger::Level => e | REDIR_LEVEL | REDIR_ACTIVE_LOW,
        });
        Ok(())
    }
}
