// =============================================================================
// KERNEL LOGGING SYSTEM - ZERO OVERHEAD
// =============================================================================
//
// Sistema de logging do núcleo com custo ZERO quando desligado.
//
// ARQUITETURA:
// - Filtragem em tempo de compilação por features do Cargo
// - Com feature "no_logs", TODOS os macros viram expressões vazias
// - SEM core::fmt - apenas strings e valores hex
// - Escreve APENAS no sink serial (drivers::serial)
//
// NÍVEIS DE LOG (do mais crítico ao menos):
// - ERROR: Erros fatais ou críticos
// - WARN:  Situações suspeitas mas recuperáveis
// - INFO:  Fluxo normal de execução
// - DEBUG: Informações de debugging
// - TRACE: Detalhes extremos (cada operação)
//
// FEATURES:
// - no_logs:   Remove 100% dos logs
// - log_error: ERROR e WARN
// - log_info:  + INFO (padrão)
// - log_debug: + DEBUG
// - log_trace: Todos os níveis
//
// COMO USAR:
//   kinfo!("(PMM) Inicializando...");             // Apenas string
//   kinfo!("(PMM) Frames livres=", free);         // String + hex
//   kdebug!("(VMM) va=", va, " pfn=", pfn);       // Dois pares
//
// =============================================================================

// =============================================================================
// PREFIXOS COM CORES ANSI
// =============================================================================

pub const P_ERROR: &str = "\x1b[1;31m[ERRO]\x1b[0m ";
pub const P_WARN: &str = "\x1b[1;33m[WARN]\x1b[0m ";
pub const P_INFO: &str = "\x1b[32m[INFO]\x1b[0m ";
pub const P_DEBUG: &str = "\x1b[36m[DEBG]\x1b[0m ";
pub const P_TRACE: &str = "\x1b[35m[TRAC]\x1b[0m ";
pub const P_OK: &str = "\x1b[32m[OK]\x1b[0m ";

/// Emissor comum a todos os níveis. Não usar diretamente.
#[doc(hidden)]
#[macro_export]
macro_rules! __klog_emit {
    ($prefix:expr, $msg:expr) => {{
        $crate::drivers::serial::emit_str($prefix);
        $crate::drivers::serial::emit_str($msg);
        $crate::drivers::serial::emit_nl();
    }};
    ($prefix:expr, $msg:expr, $val:expr) => {{
        $crate::drivers::serial::emit_str($prefix);
        $crate::drivers::serial::emit_str($msg);
        $crate::drivers::serial::emit_hex($val as u64);
        $crate::drivers::serial::emit_nl();
    }};
    ($prefix:expr, $msg1:expr, $val1:expr, $msg2:expr, $val2:expr) => {{
        $crate::drivers::serial::emit_str($prefix);
        $crate::drivers::serial::emit_str($msg1);
        $crate::drivers::serial::emit_hex($val1 as u64);
        $crate::drivers::serial::emit_str($msg2);
        $crate::drivers::serial::emit_hex($val2 as u64);
        $crate::drivers::serial::emit_nl();
    }};
}

// =============================================================================
// MACROS DE LOG - NÍVEL ERROR
// =============================================================================

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kerror {
    ($($arg:expr),+ $(,)?) => {
        $crate::__klog_emit!($crate::core::logging::P_ERROR, $($arg),+)
    };
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kerror {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL WARN
// =============================================================================

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kwarn {
    ($($arg:expr),+ $(,)?) => {
        $crate::__klog_emit!($crate::core::logging::P_WARN, $($arg),+)
    };
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kwarn {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL INFO
// =============================================================================

#[cfg(all(
    not(feature = "no_logs"),
    any(feature = "log_info", feature = "log_debug", feature = "log_trace")
))]
#[macro_export]
macro_rules! kinfo {
    ($($arg:expr),+ $(,)?) => {
        $crate::__klog_emit!($crate::core::logging::P_INFO, $($arg),+)
    };
}

#[cfg(not(all(
    not(feature = "no_logs"),
    any(feature = "log_info", feature = "log_debug", feature = "log_trace")
)))]
#[macro_export]
macro_rules! kinfo {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL DEBUG
// =============================================================================

#[cfg(all(
    not(feature = "no_logs"),
    any(feature = "log_debug", feature = "log_trace")
))]
#[macro_export]
macro_rules! kdebug {
    ($($arg:expr),+ $(,)?) => {
        $crate::__klog_emit!($crate::core::logging::P_DEBUG, $($arg),+)
    };
}

#[cfg(not(all(
    not(feature = "no_logs"),
    any(feature = "log_debug", feature = "log_trace")
)))]
#[macro_export]
macro_rules! kdebug {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL TRACE
// =============================================================================

#[cfg(all(not(feature = "no_logs"), feature = "log_trace"))]
#[macro_export]
macro_rules! ktrace {
    ($($arg:expr),+ $(,)?) => {
        $crate::__klog_emit!($crate::core::logging::P_TRACE, $($arg),+)
    };
}

#[cfg(not(all(not(feature = "no_logs"), feature = "log_trace")))]
#[macro_export]
macro_rules! ktrace {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE STATUS
// =============================================================================

/// kok! - Log de sucesso (prefixo verde [OK]).
#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kok {
    ($($arg:expr),+ $(,)?) => {
        $crate::__klog_emit!($crate::core::logging::P_OK, $($arg),+)
    };
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kok {
    ($($t:tt)*) => {{}};
}
