/// Arquivo: core/irq/dispatch.rs
///
/// Propósito: Classificação de vetores e política de exceções.
/// O roteamento concreto (VMM, scheduler, tabela de syscalls) fica em
/// `core::kernel`; aqui ficam as decisões que não dependem deles.
///
/// Detalhes de Implementação:
/// - Exceção vinda do ring 3 vira sinal para a tarefa corrente.
/// - Exceção no kernel é fatal, exceto breakpoint/debug (só log).
/// - Qualquer fault dentro de um handler de IRQ é fatal; double fault e
///   machine check são sempre fatais.
/// - Na saída da última interrupção aninhada, o trabalho diferido roda se o
///   contexto interrompido tinha IF ligado.

use super::frame::InterruptFrame;
use super::vectors;
use crate::core::smp::CpuData;
use crate::sys::Signal;

/// Origem de um vetor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Exception(Exception),
    /// IRQ externa (linha)
    Irq(u8),
    Ipi(u8),
    Syscall,
    Spurious,
    Unknown(u8),
}

impl Trap {
    pub fn classify(vector: u8) -> Self {
        if vector < vectors::EXCEPTION_END {
            Self::Exception(Exception::from_vector(vector))
        } else if let Some(line) = vectors::irq_line(vector) {
            Self::Irq(line)
        } else if vector == vectors::SYSCALL {
            Self::Syscall
        } else if vectors::is_ipi(vector) {
            Self::Ipi(vector)
        } else if vector == vectors::SPURIOUS {
            Self::Spurious
        } else {
            Self::Unknown(vector)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    DivideError,
    Debug,
    Nmi,
    Breakpoint,
    Overflow,
    BoundRange,
    InvalidOpcode,
    DeviceNotAvailable,
    DoubleFault,
    InvalidTss,
    SegmentNotPresent,
    StackFault,
    GeneralProtection,
    PageFault,
    X87Fpu,
    AlignmentCheck,
    MachineCheck,
    SimdFpu,
    Reserved(u8),
}

impl Exception {
    pub fn from_vector(vector: u8) -> Self {
        match vector {
            vectors::DIVIDE_ERROR => Self::DivideError,
            vectors::DEBUG => Self::Debug,
            vectors::NMI => Self::Nmi,
            vectors::BREAKPOINT => Self::Breakpoint,
            vectors::OVERFLOW => Self::Overflow,
            vectors::BOUND_RANGE => Self::BoundRange,
            vectors::INVALID_OPCODE => Self::InvalidOpcode,
            vectors::DEVICE_NOT_AVAILABLE => Self::DeviceNotAvailable,
            vectors::DOUBLE_FAULT => Self::DoubleFault,
            vectors::INVALID_TSS => Self::InvalidTss,
            vectors::SEGMENT_NOT_PRESENT => Self::SegmentNotPresent,
            vectors::STACK_FAULT => Self::StackFault,
            vectors::GENERAL_PROTECTION => Self::GeneralProtection,
            vectors::PAGE_FAULT => Self::PageFault,
            vectors::X87_FPU => Self::X87Fpu,
            vectors::ALIGNMENT_CHECK => Self::AlignmentCheck,
            vectors::MACHINE_CHECK => Self::MachineCheck,
            vectors::SIMD_FPU => Self::SimdFpu,
            other => Self::Reserved(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DivideError => "DIVIDE ERROR",
            Self::Debug => "DEBUG",
            Self::Nmi => "NMI",
            Self::Breakpoint => "BREAKPOINT",
            Self::Overflow => "OVERFLOW",
            Self::BoundRange => "BOUND RANGE",
            Self::InvalidOpcode => "INVALID OPCODE",
            Self::DeviceNotAvailable => "DEVICE NOT AVAILABLE",
            Self::DoubleFault => "DOUBLE FAULT",
            Self::InvalidTss => "INVALID TSS",
            Self::SegmentNotPresent => "SEGMENT NOT PRESENT",
            Self::StackFault => "STACK FAULT",
            Self::GeneralProtection => "GPF",
            Self::PageFault => "PAGE FAULT",
            Self::X87Fpu => "x87 FPU",
            Self::AlignmentCheck => "ALIGNMENT CHECK",
            Self::MachineCheck => "MACHINE CHECK",
            Self::SimdFpu => "SIMD FPU",
            Self::Reserved(_) => "RESERVED",
        }
    }

    /// Sinal entregue quando a exceção vem do ring 3.
    pub fn user_signal(&self) -> Signal {
        match self {
            Self::DivideError | Self::X87Fpu | Self::SimdFpu | Self::DeviceNotAvailable => {
                Signal::SigFpe
            }
            Self::InvalidOpcode => Signal::SigIll,
            Self::Debug | Self::Breakpoint => Signal::SigTrap,
            Self::AlignmentCheck => Signal::SigBus,
            _ => Signal::SigSegv,
        }
    }
}

/// O que fazer com uma exceção
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    /// Rotear para o VMM
    PageFault,
    Signal(Signal),
    /// Só registrar e continuar
    Log,
    Fatal,
}

pub fn exception_action(exc: Exception, from_user: bool, in_irq: bool) -> ExceptionAction {
    match exc {
        Exception::DoubleFault | Exception::MachineCheck => ExceptionAction::Fatal,
        Exception::Nmi => ExceptionAction::Log,
        _ if in_irq => ExceptionAction::Fatal,
        Exception::PageFault => ExceptionAction::PageFault,
        _ if from_user => ExceptionAction::Signal(exc.user_signal()),
        Exception::Breakpoint | Exception::Debug => ExceptionAction::Log,
        _ => ExceptionAction::Fatal,
    }
}

/// Entra em contexto de interrupção (antes de atender IRQ ou IPI).
pub fn irq_enter(cpu: &CpuData) -> u32 {
    cpu.irq_enter()
}

/// O que o stub de saída deve fazer antes do `iret`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Return,
    /// Voltando ao usuário com `need_resched` ligado
    Reschedule,
}

/// Sai do contexto de interrupção; devolve quantos itens diferidos rodaram
/// e a ação de saída.
pub fn irq_exit(cpu: &CpuData, frame: &InterruptFrame) -> (usize, ExitAction) {
    let depth = cpu.irq_exit();
    if depth > 0 {
        return (0, ExitAction::Return);
    }
    let drained = if frame.interrupts_were_enabled() {
        cpu.deferred.drain()
    } else {
        0
    };
    (drained, exit_action(cpu, frame))
}

/// Saída de trap sem contexto de IRQ (exceção, syscall).
pub fn exit_action(cpu: &CpuData, frame: &InterruptFrame) -> ExitAction {
    if frame.from_user() && cpu.need_resched() && !cpu.in_irq() {
        ExitAction::Reschedule
    } else {
        ExitAction::Return
    }
}
