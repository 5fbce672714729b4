//! Testes do núcleo de interrupções: máquina de estados das linhas,
//! espúrias, classificação e saída de IRQ.

use super::chip::recording::{Op, RecordingChip};
use super::dispatch::{irq_enter, irq_exit};
use super::*;
use crate::core::smp::CpuData;
use crate::core::work::DeferredWork;
use crate::sys::Signal;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicUsize, Ordering};

fn lines() -> (Arc<RecordingChip>, IrqLines) {
    let chip = Arc::new(RecordingChip::default());
    let lines = IrqLines::new(chip.clone());
    (chip, lines)
}

fn ctx(line: u8) -> IrqContext {
    IrqContext {
        line,
        cpu: 0,
        from_user: false,
    }
}

fn counting(hits: &Arc<AtomicUsize>) -> Arc<dyn IrqHandler> {
    let hits = hits.clone();
    Arc::new(move |_: IrqContext| {
        hits.fetch_add(1, Ordering::SeqCst);
        IrqReturn::Handled
    })
}

#[test]
fn edge_line_goes_through_service_and_back() {
    let (chip, lines) = lines();
    let hits = Arc::new(AtomicUsize::new(0));
    assert_eq!(lines.state(4), Some(LineState::Masked));

    lines.request_irq(4, "serial", Trigger::Edge, counting(&hits)).unwrap();
    assert_eq!(lines.state(4), Some(LineState::Unmasked));
    assert_eq!(chip.take(), vec![Op::Type(4, Trigger::Edge), Op::Unmask(4)]);

    assert_eq!(lines.handle(ctx(4)), Delivery::Handled);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(chip.take(), vec![Op::Ack(4), Op::Eoi(4)]);
    assert_eq!(lines.state(4), Some(LineState::Unmasked));
    assert_eq!(lines.stats(4).unwrap().count, 1);
    assert_eq!(lines.name(4), Some("serial"));
}

#[test]
fn level_line_is_masked_while_in_service() {
    let (chip, lines) = lines();
    let (chip_in, seen) = (chip.clone(), Arc::new(AtomicUsize::new(0)));
    let seen_in = seen.clone();
    lines
        .request_irq(
            11,
            "nic",
            Trigger::Level,
            Arc::new(move |_: IrqContext| {
                // Dentro do handler a linha já foi mascarada
                if chip_in.take().contains(&Op::Mask(11)) {
                    seen_in.store(1, Ordering::SeqCst);
                }
                IrqReturn::Handled
            }),
        )
        .unwrap();
    chip.take();

    assert_eq!(lines.handle(ctx(11)), Delivery::Handled);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    // EOI antes de desmascarar
    assert_eq!(chip.take(), vec![Op::Eoi(11), Op::Unmask(11)]);
    assert_eq!(lines.state(11), Some(LineState::Unmasked));
}

#[test]
fn masked_or_empty_lines_count_spurious_and_still_eoi() {
    let (chip, lines) = lines();
    assert_eq!(lines.handle(ctx(3)), Delivery::Spurious);
    assert_eq!(chip.take(), vec![Op::Eoi(3)]);
    assert_eq!(lines.stats(3).unwrap().spurious, 1);

    let hits = Arc::new(AtomicUsize::new(0));
    lines.request_irq(3, "com2", Trigger::Edge, counting(&hits)).unwrap();
    lines.disable_irq(3).unwrap();
    assert_eq!(lines.state(3), Some(LineState::Masked));
    assert_eq!(lines.handle(ctx(3)), Delivery::Spurious);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    let stats = lines.stats(3).unwrap();
    assert_eq!((stats.count, stats.spurious), (0, 2));

    lines.enable_irq(3).unwrap();
    assert_eq!(lines.handle(ctx(3)), Delivery::Handled);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn disable_from_handler_masks_at_acknowledge() {
    let chip = Arc::new(RecordingChip::default());
    let lines = Arc::new(IrqLines::new(chip.clone()));
    let inner = Arc::downgrade(&lines);
    lines
        .request_irq(
            5,
            "oneshot",
            Trigger::Edge,
            Arc::new(move |ctx: IrqContext| {
                if let Some(lines) = inner.upgrade() {
                    assert_eq!(lines.state(ctx.line), Some(LineState::PendingInService));
                    lines.disable_irq(ctx.line).unwrap();
                    // Ainda em serviço: o mascaramento fica para depois
                    assert_eq!(lines.state(ctx.line), Some(LineState::PendingInService));
                    assert_eq!(lines.free_irq(ctx.line), Err(IrqError::Busy));
                }
                IrqReturn::Handled
            }),
        )
        .unwrap();
    chip.take();

    assert_eq!(lines.handle(ctx(5)), Delivery::Handled);
    assert_eq!(chip.take(), vec![Op::Ack(5), Op::Eoi(5), Op::Mask(5)]);
    assert_eq!(lines.state(5), Some(LineState::Masked));
    assert_eq!(lines.free_irq(5), Ok(()));
}

#[test]
fn request_and_free_validate_the_line() {
    let (_chip, lines) = lines();
    let hits = Arc::new(AtomicUsize::new(0));
    assert_eq!(
        lines.request_irq(200, "x", Trigger::Edge, counting(&hits)),
        Err(IrqError::InvalidLine)
    );
    lines.request_irq(1, "kbd", Trigger::Edge, counting(&hits)).unwrap();
    assert_eq!(
        lines.request_irq(1, "outro", Trigger::Edge, counting(&hits)),
        Err(IrqError::Busy)
    );
    assert_eq!(lines.free_irq(1), Ok(()));
    assert_eq!(lines.free_irq(1), Err(IrqError::NotRequested));
    assert_eq!(lines.state(1), Some(LineState::Masked));
    assert_eq!(lines.enable_irq(1), Err(IrqError::NotRequested));
    assert_eq!(crate::sys::Errno::from(IrqError::Busy), crate::sys::Errno::EBUSY);
}

#[test]
fn handler_not_mine_is_counted() {
    let (_chip, lines) = lines();
    lines
        .request_irq(9, "shared", Trigger::Edge, Arc::new(|_: IrqContext| IrqReturn::NotMine))
        .unwrap();
    assert_eq!(lines.handle(ctx(9)), Delivery::Unhandled);
    assert_eq!(lines.stats(9).unwrap().unhandled, 1);
}

#[test]
fn vectors_are_classified() {
    assert_eq!(Trap::classify(14), Trap::Exception(Exception::PageFault));
    assert_eq!(Trap::classify(32), Trap::Irq(0));
    assert_eq!(Trap::classify(33), Trap::Irq(1));
    assert_eq!(Trap::classify(0x80), Trap::Syscall);
    assert_eq!(Trap::classify(0xF2), Trap::Ipi(0xF2));
    assert_eq!(Trap::classify(0xFF), Trap::Spurious);
    assert_eq!(Trap::classify(0x90), Trap::Unknown(0x90));
    assert_eq!(Trap::classify(21), Trap::Exception(Exception::Reserved(21)));
}

#[test]
fn exceptions_become_signals_in_user_and_fatal_in_kernel() {
    use ExceptionAction::{Fatal, Log, PageFault};
    let signal = |sig| ExceptionAction::Signal(sig);
    assert_eq!(exception_action(Exception::DivideError, true, false), signal(Signal::SigFpe));
    assert_eq!(exception_action(Exception::InvalidOpcode, true, false), signal(Signal::SigIll));
    assert_eq!(exception_action(Exception::GeneralProtection, true, false), signal(Signal::SigSegv));
    assert_eq!(exception_action(Exception::Breakpoint, true, false), signal(Signal::SigTrap));
    assert_eq!(exception_action(Exception::GeneralProtection, false, false), Fatal);
    assert_eq!(exception_action(Exception::Breakpoint, false, false), Log);
    assert_eq!(exception_action(Exception::PageFault, true, false), PageFault);
    assert_eq!(exception_action(Exception::PageFault, false, true), Fatal);
    assert_eq!(exception_action(Exception::DoubleFault, true, false), Fatal);
    assert_eq!(exception_action(Exception::Nmi, false, true), Log);
}

fn bump(data: usize) {
    let counter = unsafe { &*(data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn deferred_work_drains_on_outermost_exit_only() {
    let cpu = CpuData::new(0);
    let counter = Box::leak(Box::new(AtomicUsize::new(0)));
    let frame = InterruptFrame::kernel(vectors::IRQ_TIMER);

    irq_enter(&cpu);
    irq_enter(&cpu);
    assert!(cpu.deferred.defer(DeferredWork::Fn(bump, counter as *const _ as usize)).is_ok());
    assert_eq!(irq_exit(&cpu, &frame), (0, ExitAction::Return));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(irq_exit(&cpu, &frame), (1, ExitAction::Return));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Contexto interrompido com IF desligado: fica para depois
    let mut masked = frame;
    masked.eflags = 0;
    irq_enter(&cpu);
    assert!(cpu.deferred.defer(DeferredWork::Fn(bump, counter as *const _ as usize)).is_ok());
    assert_eq!(irq_exit(&cpu, &masked), (0, ExitAction::Return));
    assert_eq!(cpu.deferred.len(), 1);
}

#[test]
fn return_to_user_honors_need_resched() {
    let cpu = CpuData::new(0);
    let user = InterruptFrame::user(vectors::IRQ_TIMER);
    irq_enter(&cpu);
    cpu.set_need_resched();
    assert_eq!(irq_exit(&cpu, &user).1, ExitAction::Reschedule);

    irq_enter(&cpu);
    assert_eq!(irq_exit(&cpu, &InterruptFrame::kernel(vectors::IRQ_TIMER)).1, ExitAction::Return);
}
