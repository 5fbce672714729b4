//! # Standard Error Codes (Errno)
//!
//! Define os códigos de erro retornados pelo kernel.
//! Baseado no padrão POSIX para compatibilidade com ferramentas existentes.
//!
//! Todo erro visível ao usuário viaja como inteiro pequeno com sinal negativo
//! (`as_isize`). Os subsistemas mantêm enums próprios (`MmError`, `SwapError`,
//! ...) e convertem para `Errno` na fronteira.

use core::fmt;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    Success = 0,
    EPERM = 1,      // Operation not permitted
    ENOENT = 2,     // No such file or directory
    ESRCH = 3,      // No such process
    EINTR = 4,      // Interrupted system call
    EIO = 5,        // I/O error
    ENXIO = 6,      // No such device or address
    ECHILD = 10,    // No child processes
    EAGAIN = 11,    // Try again
    ENOMEM = 12,    // Out of memory
    EACCES = 13,    // Permission denied
    EFAULT = 14,    // Bad address
    EBUSY = 16,     // Device or resource busy
    EEXIST = 17,    // File exists
    ENODEV = 19,    // No such device
    EINVAL = 22,    // Invalid argument
    ENOSPC = 28,    // No space left on device
    ERANGE = 34,    // Math result not representable
    EDEADLK = 35,   // Resource deadlock would occur
    ENOSYS = 38,    // Function not implemented
    ETIMEDOUT = 110, // Connection timed out
}

impl Errno {
    pub fn as_usize(self) -> usize {
        self as usize
    }

    /// Código negativo (convenção de retorno em EAX).
    pub fn as_isize(self) -> isize {
        -(self as i32) as isize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "sucesso",
            Self::EPERM => "operação não permitida",
            Self::ENOENT => "não encontrado",
            Self::ESRCH => "tarefa inexistente",
            Self::EINTR => "interrompido por sinal",
            Self::EIO => "erro de I/O",
            Self::ENXIO => "dispositivo ou endereço inexistente",
            Self::ECHILD => "sem filhos",
            Self::EAGAIN => "tente novamente",
            Self::ENOMEM => "sem memória",
            Self::EACCES => "permissão negada",
            Self::EFAULT => "endereço inválido",
            Self::EBUSY => "recurso ocupado",
            Self::EEXIST => "já existe",
            Self::ENODEV => "dispositivo inexistente",
            Self::EINVAL => "argumento inválido",
            Self::ENOSPC => "sem espaço",
            Self::ERANGE => "fora do intervalo",
            Self::EDEADLK => "deadlock evitado",
            Self::ENOSYS => "não implementado",
            Self::ETIMEDOUT => "tempo esgotado",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), *self as i32)
    }
}

/// Classes abstratas de erro, em ordem de severidade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Ponteiro ou flags inválidos vindos de syscall.
    InvalidArg,
    /// Exaustão de frames ou falha de alocador (pode disparar reclaim).
    NoMem,
    /// Caminho não-bloqueante que precisaria bloquear.
    Again,
    /// Falha de swap ou de backing de arquivo.
    Io,
    /// Proteção de VMA incompatível.
    Perm,
    /// Violação de invariante: termina em panic.
    Fatal,
}

impl ErrorKind {
    /// Código negativo entregue ao chamador.
    ///
    /// `Fatal` nunca chega ao usuário; o mapeamento existe para logs.
    pub fn errno(self) -> Errno {
        match self {
            Self::InvalidArg => Errno::EINVAL,
            Self::NoMem => Errno::ENOMEM,
            Self::Again => Errno::EAGAIN,
            Self::Io => Errno::EIO,
            Self::Perm => Errno::EFAULT,
            Self::Fatal => Errno::EPERM,
        }
    }
}

/// Resultado de syscall já no formato da ABI.
pub type SysResult<T> = Result<T, Errno>;

/// Codifica um `SysResult` no valor de retorno do acumulador.
pub fn encode_result(result: SysResult<usize>) -> u32 {
    match result {
        Ok(value) => value as u32,
        Err(errno) => errno.as_isize() as i32 as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_codes_for_callers() {
        assert_eq!(Errno::ENOSYS.as_isize(), -38);
        assert_eq!(encode_result(Err(Errno::ENOMEM)) as i32, -12);
        assert_eq!(encode_result(Ok(7)), 7);
    }

    #[test]
    fn kinds_map_to_posix_numbers() {
        assert_eq!(ErrorKind::NoMem.errno(), Errno::ENOMEM);
        assert_eq!(ErrorKind::Io.errno(), Errno::EIO);
        assert!(ErrorKind::Perm < ErrorKind::Fatal);
    }
}
