/// Arquivo: core/irq/lines.rs
///
/// Propósito: Linhas de IRQ: handlers registrados, máquina de estados e
/// estatísticas.
///
/// ```text
/// Masked ──enable──▶ Unmasked ──chegada──▶ PendingInService
///   ▲                   ▲                        │ handler
///   │                   └──────── EOI ──── Acknowledged
///   └──── disable adiado (ou free) ──────────────┘
/// ```
///
/// Detalhes de Implementação:
/// - O handler roda sem o lock da linha (pode chamar `disable_irq`).
/// - Linhas por nível ficam mascaradas enquanto em serviço e são
///   desmascaradas depois do EOI.
/// - Chegada numa linha mascarada ou sem handler conta como espúria e
///   recebe EOI do mesmo jeito.

use super::chip::{IrqChip, Trigger};
use super::IrqError;
use crate::arch::CpuId;
use crate::core::config::NR_IRQS;
use crate::core::smp::CpuMask;
use crate::sync::{LockRank, Spinlock};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Masked,
    Unmasked,
    PendingInService,
    Acknowledged,
}

impl LineState {
    fn can_become(self, to: LineState) -> bool {
        use LineState::*;
        matches!(
            (self, to),
            (Masked, Unmasked)
                | (Unmasked, Masked)
                | (Unmasked, PendingInService)
                | (PendingInService, Acknowledged)
                | (Acknowledged, Masked)
                | (Acknowledged, Unmasked)
        )
    }
}

/// O que o handler informa sobre a interrupção.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    Handled,
    /// O dispositivo não tinha nada pendente
    NotMine,
}

/// Contexto entregue ao handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqContext {
    pub line: u8,
    pub cpu: CpuId,
    /// A interrupção interrompeu código de usuário
    pub from_user: bool,
}

pub trait IrqHandler: Send + Sync {
    fn handle(&self, ctx: IrqContext) -> IrqReturn;
}

impl<F> IrqHandler for F
where
    F: Fn(IrqContext) -> IrqReturn + Send + Sync,
{
    fn handle(&self, ctx: IrqContext) -> IrqReturn {
        self(ctx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqStats {
    pub count: u64,
    pub spurious: u64,
    /// Handler devolveu `NotMine`
    pub unhandled: u64,
}

/// Resultado de uma entrega.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Unhandled,
    Spurious,
}

struct Line {
    state: LineState,
    trigger: Trigger,
    name: &'static str,
    handler: Option<Arc<dyn IrqHandler>>,
    /// `disable_irq` chegou com a linha em serviço
    disable_pending: bool,
    stats: IrqStats,
}

impl Line {
    fn new() -> Self {
        Self {
            state: LineState::Masked,
            trigger: Trigger::Edge,
            name: "",
            handler: None,
            disable_pending: false,
            stats: IrqStats::default(),
        }
    }

    fn set_state(&mut self, to: LineState) {
        debug_assert!(
            self.state.can_become(to),
            "transição de linha de IRQ inválida"
        );
        self.state = to;
    }
}

/// Tabela de linhas sobre um controlador.
pub struct IrqLines {
    chip: Arc<dyn IrqChip>,
    lines: Box<[Spinlock<Line>]>,
}

impl IrqLines {
    pub fn new(chip: Arc<dyn IrqChip>) -> Self {
        let nr = NR_IRQS.min(chip.nr_lines() as usize);
        let lines: Vec<Spinlock<Line>> = (0..nr)
            .map(|_| Spinlock::new(LockRank::IrqChip, Line::new()))
            .collect();
        crate::kdebug!("(IRQ) linhas disponíveis: ", nr);
        Self {
            chip,
            lines: lines.into_boxed_slice(),
        }
    }

    pub fn chip(&self) -> &Arc<dyn IrqChip> {
        &self.chip
    }

    pub fn nr_lines(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, line: u8) -> Result<&Spinlock<Line>, IrqError> {
        self.lines.get(line as usize).ok_or(IrqError::InvalidLine)
    }

    /// Instala `handler` e desmascara a linha.
    pub fn request_irq(
        &self,
        line: u8,
        name: &'static str,
        trigger: Trigger,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<(), IrqError> {
        let slot = self.line(line)?;
        let mut l = slot.lock_irqsave();
        if l.handler.is_some() {
            return Err(IrqError::Busy);
        }
        self.chip.set_type(line, trigger)?;
        l.trigger = trigger;
        l.name = name;
        l.handler = Some(handler);
        l.disable_pending = false;
        l.set_state(LineState::Unmasked);
        self.chip.unmask(line);
        crate::kinfo!("(IRQ) handler instalado na linha ", line);
        Ok(())
    }

    /// Remove o handler e mascara a linha. Falha com a linha em serviço.
    pub fn free_irq(&self, line: u8) -> Result<(), IrqError> {
        let slot = self.line(line)?;
        let mut l = slot.lock_irqsave();
        if l.handler.is_none() {
            return Err(IrqError::NotRequested);
        }
        match l.state {
            LineState::PendingInService | LineState::Acknowledged => return Err(IrqError::Busy),
            LineState::Unmasked => {
                self.chip.mask(line);
                l.set_state(LineState::Masked);
            }
            LineState::Masked => {}
        }
        l.handler = None;
        l.name = "";
        l.disable_pending = false;
        Ok(())
    }

    /// Mascara a linha. Em serviço, o mascaramento fica para o EOI.
    pub fn disable_irq(&self, line: u8) -> Result<(), IrqError> {
        let slot = self.line(line)?;
        let mut l = slot.lock_irqsave();
        match l.state {
            LineState::Unmasked => {
                self.chip.mask(line);
                l.set_state(LineState::Masked);
            }
            LineState::PendingInService | LineState::Acknowledged => l.disable_pending = true,
            LineState::Masked => {}
        }
        Ok(())
    }

    pub fn enable_irq(&self, line: u8) -> Result<(), IrqError> {
        let slot = self.line(line)?;
        let mut l = slot.lock_irqsave();
        if l.handler.is_none() {
            return Err(IrqError::NotRequested);
        }
        match l.state {
            LineState::Masked => {
                l.set_state(LineState::Unmasked);
                self.chip.unmask(line);
            }
            LineState::PendingInService | LineState::Acknowledged => l.disable_pending = false,
            LineState::Unmasked => {}
        }
        Ok(())
    }

    pub fn set_affinity(&self, line: u8, cpus: CpuMask) -> Result<(), IrqError> {
        let _ = self.line(line)?;
        if cpus.is_empty() {
            return Err(IrqError::InvalidLine);
        }
        self.chip.set_affinity(line, cpus)
    }

    pub fn state(&self, line: u8) -> Option<LineState> {
        self.line(line).ok().map(|l| l.lock_irqsave().state)
    }

    pub fn stats(&self, line: u8) -> Option<IrqStats> {
        self.line(line).ok().map(|l| l.lock_irqsave().stats)
    }

    pub fn name(&self, line: u8) -> Option<&'static str> {
        self.line(line).ok().map(|l| l.lock_irqsave().name)
    }

    /// Entrega uma interrupção da linha `ctx.line` (contexto de IRQ).
    pub fn handle(&self, ctx: IrqContext) -> Delivery {
        let line = ctx.line;
        let Ok(slot) = self.line(line) else {
            self.chip.eoi(line);
            return Delivery::Spurious;
        };

        let handler = {
            let mut l = slot.lock_irqsave();
            match (l.state, l.handler.clone()) {
                (LineState::Unmasked, Some(handler)) => {
                    l.set_state(LineState::PendingInService);
                    if l.trigger == Trigger::Level {
                        self.chip.mask(line);
                    }
                    self.chip.ack(line);
                    l.stats.count += 1;
                    handler
                }
                _ => {
                    l.stats.spurious += 1;
                    self.chip.eoi(line);
                    crate::ktrace!("(IRQ) interrupção espúria na linha ", line);
                    return Delivery::Spurious;
                }
            }
        };

        let ret = handler.handle(ctx);

        let mut l = slot.lock_irqsave();
        self.chip.eoi(line);
        l.set_state(LineState::Acknowledged);
        if l.disable_pending {
            l.disable_pending = false;
            if l.trigger == Trigger::Edge {
                self.chip.mask(line);
            }
            l.set_state(LineState::Masked);
        } else {
            if l.trigger == Trigger::Level {
                self.chip.unmask(line);
            }
            l.set_state(LineState::Unmasked);
        }

        match ret {
            IrqReturn::Handled => Delivery::Handled,
            IrqReturn::NotMine => {
                l.stats.unhandled += 1;
                Delivery::Unhandled
            }
        }
    }
}
