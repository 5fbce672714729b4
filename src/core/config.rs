/// Arquivo: core/config.rs
///
/// Propósito: Configuração do núcleo.
/// Constantes de compilação (limites de CPUs, IRQs, tabela de syscalls) e a
/// configuração de runtime lida da linha de comando do bootloader.
///
/// Detalhes de Implementação:
/// - Tokens `chave=valor` separados por espaço.
/// - Chaves desconhecidas ou valores inválidos geram `kwarn!` e são ignorados.

// =============================================================================
// LIMITES DE COMPILAÇÃO
// =============================================================================

/// Número máximo de CPUs suportadas (largura da `CpuMask`).
pub const MAX_CPUS: usize = 32;

/// Linhas de IRQ externas (PIC duplo / IOAPIC padrão).
pub const NR_IRQS: usize = 24;

/// Frequência padrão do timer.
pub const DEFAULT_HZ: u32 = 100;

/// Entradas na tabela de syscalls (números estáveis e densos).
pub const NR_SYSCALLS: usize = 400;

/// Time slice padrão do round-robin, em ticks.
pub const DEFAULT_TIMESLICE: u32 = 10;

/// Ticks até desistir de um AP que não reportou online.
pub const AP_BOOT_TIMEOUT_SPINS: u32 = 200_000;

// =============================================================================
// CONFIGURAÇÃO DE RUNTIME
// =============================================================================

/// Backend de swap selecionado no boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapConfig {
    Off,
    /// Swap em RAM com `n` slots de página.
    Ram(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub nr_cpus: usize,
    pub hz: u32,
    pub swap: SwapConfig,
    /// Ticks entre auditorias do MM (0 = desligado).
    pub audit_interval: u64,
    pub selftest: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            nr_cpus: MAX_CPUS,
            hz: DEFAULT_HZ,
            swap: SwapConfig::Off,
            audit_interval: if cfg!(feature = "mm_audit") { 100 } else { 0 },
            selftest: cfg!(feature = "self_test"),
        }
    }
}

impl KernelConfig {
    /// Lê a linha de comando. Nunca falha: o que não entende é ignorado.
    pub fn parse(cmdline: &str) -> Self {
        let mut config = Self::default();

        for token in cmdline.split_ascii_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                // Flags soltas pertencem ao colaborador (ex: "quiet")
                continue;
            };

            let ok = match key {
                "nr_cpus" => parse_num(value)
                    .filter(|&n| n >= 1)
                    .map(|n| config.nr_cpus = (n as usize).min(MAX_CPUS))
                    .is_some(),
                "hz" => parse_num(value)
                    .filter(|&n| (10..=1000).contains(&n))
                    .map(|n| config.hz = n as u32)
                    .is_some(),
                "swap" => parse_swap(value).map(|s| config.swap = s).is_some(),
                "audit" => parse_num(value).map(|n| config.audit_interval = n).is_some(),
                "selftest" => match value {
                    "on" => {
                        config.selftest = true;
                        true
                    }
                    "off" => {
                        config.selftest = false;
                        true
                    }
                    _ => false,
                },
                _ => {
                    crate::kwarn!("(Boot) Parâmetro desconhecido ignorado: ");
                    crate::kwarn!(key);
                    continue;
                }
            };

            if !ok {
                crate::kwarn!("(Boot) Valor inválido ignorado para: ");
                crate::kwarn!(key);
            }
        }

        config
    }
}

fn parse_num(s: &str) -> Option<u64> {
    s.parse::<u64>().ok()
}

fn parse_swap(s: &str) -> Option<SwapConfig> {
    if s == "off" {
        return Some(SwapConfig::Off);
    }
    let pages = parse_num(s.strip_prefix("ram:")?)?;
    (pages > 0).then_some(SwapConfig::Ram(pages as usize))
}
