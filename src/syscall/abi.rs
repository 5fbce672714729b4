//! # Syscall ABI
//!
//! Convenção de chamada (`int 0x80`):
//!
//! | Registrador | Uso       |
//! |-------------|-----------|
//! | EAX         | número / retorno |
//! | EBX         | arg1      |
//! | ECX         | arg2      |
//! | EDX         | arg3      |
//! | ESI         | arg4      |
//! | EDI         | arg5      |
//! | EBP         | arg6      |
//!
//! Retorno negativo = `-errno`.

use crate::core::irq::InterruptFrame;

/// Argumentos extraídos do frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    pub num: usize,
    pub arg1: usize,
    pub arg2: usize,
    pub arg3: usize,
    pub arg4: usize,
    pub arg5: usize,
    pub arg6: usize,
}

impl SyscallArgs {
    pub fn from_frame(frame: &InterruptFrame) -> Self {
        let [arg1, arg2, arg3, arg4, arg5, arg6] = frame.syscall_args().map(|r| r as usize);
        Self {
            num: frame.syscall_number() as usize,
            arg1,
            arg2,
            arg3,
            arg4,
            arg5,
            arg6,
        }
    }
}
