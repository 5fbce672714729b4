//! Tipos de Erro do Subsistema de Memória
//!
//! Define erros estruturados para diagnóstico preciso de falhas em MM.

use crate::sys::error::{Errno, ErrorKind};

/// Erros do subsistema de memória
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// Sem memória física disponível (OOM)
    OutOfMemory,
    /// PTE já ocupada (presente ou entrada de swap)
    AlreadyMapped,
    /// Região não mapeada
    NotMapped,
    /// Parâmetro inválido
    InvalidParameter,
    /// Endereço inválido (fora do espaço de usuário ou da memória gerenciada)
    InvalidAddress,
    /// Endereço não alinhado a página
    NotAligned,
    /// Tamanho inválido (zero ou muito grande)
    InvalidSize,
    /// Reserva sobre frame já alocado
    AlreadyAllocated,
    /// Nenhuma VMA cobre o endereço
    NoVma,
    /// Proteção da VMA incompatível com o acesso
    ProtectionFault,
    /// Página em uso (travada, compartilhada, em writeback)
    Busy,
    /// Área de swap cheia
    SwapFull,
    /// Falha de I/O no swap ou no backing de arquivo
    Io,
}

impl MmError {
    /// Retorna descrição legível do erro
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "OOM: sem frames físicos disponíveis",
            Self::AlreadyMapped => "Região já mapeada",
            Self::NotMapped => "Região não mapeada",
            Self::InvalidParameter => "Parâmetro inválido",
            Self::InvalidAddress => "Endereço inválido",
            Self::NotAligned => "Endereço não alinhado a página",
            Self::InvalidSize => "Tamanho inválido",
            Self::AlreadyAllocated => "Frame já alocado",
            Self::NoVma => "Nenhuma VMA cobre o endereço",
            Self::ProtectionFault => "Proteção incompatível",
            Self::Busy => "Página ocupada",
            Self::SwapFull => "Swap cheio",
            Self::Io => "Erro de I/O",
        }
    }

    /// Classe abstrata do erro.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfMemory => ErrorKind::NoMem,
            Self::Busy => ErrorKind::Again,
            Self::SwapFull => ErrorKind::NoMem,
            Self::Io => ErrorKind::Io,
            Self::ProtectionFault | Self::NoVma => ErrorKind::Perm,
            _ => ErrorKind::InvalidArg,
        }
    }
}

impl core::fmt::Display for MmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<MmError> for Errno {
    fn from(err: MmError) -> Self {
        match err {
            MmError::AlreadyMapped | MmError::AlreadyAllocated => Errno::EEXIST,
            MmError::SwapFull => Errno::ENOSPC,
            MmError::NoVma | MmError::ProtectionFault | MmError::InvalidAddress => Errno::EFAULT,
            MmError::Busy => Errno::EBUSY,
            other => other.kind().errno(),
        }
    }
}

/// Tipo Result específico para operações de memória
pub type MmResult<T> = Result<T, MmError>;
