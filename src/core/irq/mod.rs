/// Arquivo: core/irq/mod.rs
///
/// Propósito: Núcleo de interrupções independente de plataforma.
///
/// Módulos contidos:
/// - `vectors`: Mapa de vetores da IDT.
/// - `frame`: Registradores salvos pelo stub de entrada.
/// - `chip`: Trait do controlador e o 8259.
/// - `lines`: Linhas de IRQ, handlers e estatísticas.
/// - `dispatch`: Classificação de vetores e política de exceções.

pub mod chip;
pub mod dispatch;
pub mod frame;
pub mod lines;
pub mod vectors;

pub use chip::{IrqChip, Pic8259, Trigger};
pub use dispatch::{exception_action, Exception, ExceptionAction, ExitAction, Trap};
pub use frame::InterruptFrame;
pub use lines::{Delivery, IrqContext, IrqHandler, IrqLines, IrqReturn, IrqStats, LineState};

use crate::sys::error::Errno;
use core::fmt;

/// Erros do núcleo de interrupções
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Linha além das que o controlador atende
    InvalidLine,
    /// Linha já tem handler, ou está em serviço
    Busy,
    /// Linha sem handler
    NotRequested,
    /// O controlador não suporta o modo pedido
    Unsupported,
}

impl IrqError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidLine => "Linha de IRQ inválida",
            Self::Busy => "Linha de IRQ ocupada",
            Self::NotRequested => "Linha de IRQ sem handler",
            Self::Unsupported => "Modo não suportado pelo controlador",
        }
    }
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<IrqError> for Errno {
    fn from(err: IrqError) -> Self {
        match err {
            IrqError::InvalidLine => Errno::EINVAL,
            IrqError::Busy => Errno::EBUSY,
            IrqError::NotRequested => Errno::ENOENT,
            IrqError::Unsupported => Errno::ENODEV,
        }
    }
}

#[cfg(test)]
mod test;
