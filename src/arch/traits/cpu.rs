//! Interface Abstrata de CPU (HAL).
//! Define as operações que cada plataforma (x86 real ou simulada) implementa.

/// Índice lógico de CPU (0 = BSP).
pub type CpuId = usize;

/// Estado do flag de interrupção salvo por `irq_disable_save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct IrqFlags(bool);

impl IrqFlags {
    pub const fn new(enabled: bool) -> Self {
        Self(enabled)
    }

    pub const fn were_enabled(self) -> bool {
        self.0
    }
}

pub trait CpuOps {
    /// Identificador lógico da CPU que executa o chamador.
    fn current_id() -> CpuId;

    /// Para a execução da CPU até a próxima interrupção (instrução HLT).
    fn halt();

    /// Dica de spin-loop (PAUSE).
    fn pause();

    /// Habilita interrupções globalmente (STI).
    fn irq_enable();

    /// Desabilita interrupções globalmente (CLI).
    fn irq_disable();

    /// Verifica se as interrupções estão habilitadas.
    fn interrupts_enabled() -> bool;

    /// Salva o flag de interrupção e desabilita.
    fn irq_disable_save() -> IrqFlags {
        let flags = IrqFlags::new(Self::interrupts_enabled());
        Self::irq_disable();
        flags
    }

    /// Restaura o estado salvo por [`CpuOps::irq_disable_save`].
    fn irq_restore(flags: IrqFlags) {
        if flags.were_enabled() {
            Self::irq_enable();
        }
    }

    /// Endereço linear que causou o último page fault.
    fn read_cr2() -> u32;

    /// Raiz de page table carregada (endereço físico do page directory).
    fn read_cr3() -> u32;

    /// Carrega uma nova raiz. Descarta todas as entradas de TLB não-globais.
    ///
    /// # Safety
    /// `root` deve ser um page directory válido que mapeie o kernel.
    unsafe fn write_cr3(root: u32);

    /// Invalida a entrada de TLB de uma página nesta CPU.
    ///
    /// # Safety
    /// Instrução privilegiada; sempre segura do ponto de vista de memória.
    unsafe fn invlpg(va: u32);

    /// Descarta toda a TLB local.
    fn flush_tlb_local();

    /// Consulta a TLB por software. Plataformas com TLB de hardware sempre
    /// devolvem `None` (o hardware faz a consulta em acessos reais).
    fn tlb_lookup(root: u32, va: u32) -> Option<u32>;

    /// Registra uma tradução na TLB por software (no-op no hardware).
    fn tlb_fill(root: u32, va: u32, pte: u32);

    /// # Safety
    /// A porta deve pertencer ao chamador.
    unsafe fn inb(port: u16) -> u8;

    /// # Safety
    /// A porta deve pertencer ao chamador.
    unsafe fn outb(port: u16, value: u8);

    /// Envia uma IPI com o vetor dado para a CPU alvo.
    fn send_ipi(target: CpuId, vector: u8);

    /// Entra em loop infinito de halt com interrupções desabilitadas.
    /// Usado em pânicos irrecuperáveis e no STOP.
    fn hang() -> ! {
        Self::irq_disable();
        loop {
            Self::halt();
        }
    }
}
