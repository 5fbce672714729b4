//! System Definitions (ABI).
//!
//! Contém as constantes e tipos que definem a interface entre o Kernel e o Mundo.

pub mod error;
pub mod signal;

pub use error::{encode_result, Errno, ErrorKind, SysResult};
pub use signal::{Signal, SignalSet};
