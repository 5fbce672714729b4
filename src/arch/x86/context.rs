//! Troca de contexto por pilha de kernel (i686).
//!
//! Cada tarefa tem uma pilha própria; o contexto salvo é só o ESP. Os
//! registradores callee-saved (EBP, EBX, ESI, EDI) e o endereço de retorno
//! ficam na própria pilha, empilhados por `nucleo_switch`.
//!
//! Uma tarefa nova nasce com uma pilha forjada: o primeiro `ret` cai em
//! `nucleo_task_start` com EBX apontando para o corpo da tarefa.

use super::cpu::Cpu;
use super::gdt;
use crate::arch::traits::CpuOps;
use alloc::boxed::Box;
use alloc::vec;
use core::cell::UnsafeCell;

/// Pilha de kernel de cada tarefa.
pub const TASK_STACK_SIZE: usize = 16 * 1024;

core::arch::global_asm!(
    ".section .text",
    ".global nucleo_switch",
    // nucleo_switch(prev_esp: *mut u32, next_esp: u32)
    "nucleo_switch:",
    "mov eax, [esp + 4]",
    "mov edx, [esp + 8]",
    "push ebp",
    "push ebx",
    "push esi",
    "push edi",
    "mov [eax], esp",
    "mov esp, edx",
    "pop edi",
    "pop esi",
    "pop ebx",
    "pop ebp",
    "ret",
    "",
    // nucleo_switch_final(next_esp: u32)
    ".global nucleo_switch_final",
    "nucleo_switch_final:",
    "mov esp, [esp + 4]",
    "pop edi",
    "pop esi",
    "pop ebx",
    "pop ebp",
    "ret",
    "",
    ".global nucleo_task_start",
    "nucleo_task_start:",
    "push ebx",
    "call nucleo_task_entry",
    "ud2",
);

extern "C" {
    fn nucleo_switch(prev_esp: *mut u32, next_esp: u32);
    fn nucleo_switch_final(next_esp: u32) -> !;
    fn nucleo_task_start();
}

type Entry = Box<dyn FnOnce() + Send>;

#[no_mangle]
extern "C" fn nucleo_task_entry(raw: *mut Entry) -> ! {
    // SAFETY: `raw` veio de Box::into_raw em Context::spawn e é consumido
    // uma única vez, no primeiro despacho da tarefa.
    let entry = unsafe { Box::from_raw(raw) };
    (*entry)();
    // O trampolim do scheduler termina em exit_current
    panic!("(Sched) corpo de tarefa retornou ao início da pilha");
}

/// Contexto salvo de uma tarefa.
pub struct Context {
    esp: UnsafeCell<u32>,
    /// Topo da pilha (ESP0 no TSS); 0 para a pilha de boot
    stack_top: u32,
    _stack: Option<Box<[u8]>>,
}

// SAFETY: `esp` só é escrito pela CPU que está saindo da tarefa, com a tarefa
// reservada (on_cpu) pelo scheduler; ninguém mais o lê nesse intervalo.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    /// Contexto para o fluxo que já está executando (idle/boot).
    pub fn for_current() -> Self {
        Self {
            esp: UnsafeCell::new(0),
            stack_top: 0,
            _stack: None,
        }
    }

    pub fn spawn(_name: &str, entry: Entry) -> Self {
        let mut stack = vec![0u8; TASK_STACK_SIZE].into_boxed_slice();
        let top = (stack.as_mut_ptr() as usize + TASK_STACK_SIZE) & !0xF;
        let raw = Box::into_raw(Box::new(entry)) as u32;

        // [edi, esi, ebx, ebp, ret] a partir do ESP salvo
        let initial = [0, 0, raw, 0, nucleo_task_start as usize as u32];
        let esp = top - core::mem::size_of_val(&initial);
        // SAFETY: `esp..top` está dentro da pilha recém-alocada
        unsafe { (esp as *mut [u32; 5]).write(initial) };

        Self {
            esp: UnsafeCell::new(esp as u32),
            stack_top: top as u32,
            _stack: Some(stack),
        }
    }
}

/// Executa o corpo de uma tarefa (sem unwind no bare-metal).
pub fn run_guarded(entry: Entry) -> i32 {
    entry();
    0
}

/// Salva `prev` e retoma `next` na CPU atual.
///
/// # Safety
/// `prev` deve ser o contexto da tarefa corrente e `next` um contexto
/// parado (não executando em nenhuma CPU); interrupções desligadas.
pub unsafe fn switch_to(prev: &Context, next: &Context) {
    if next.stack_top != 0 {
        gdt::set_kernel_stack(Cpu::current_id(), next.stack_top);
    }
    nucleo_switch(prev.esp.get(), *next.esp.get());
}

/// Retoma `next` sem salvar a tarefa corrente (saída).
///
/// # Safety
/// Mesmas condições de [`switch_to`] para `next`; a pilha corrente precisa
/// continuar alocada até `next` começar a executar.
pub unsafe fn switch_final(next: &Context) -> ! {
    if next.stack_top != 0 {
        gdt::set_kernel_stack(Cpu::current_id(), next.stack_top);
    }
    nucleo_switch_final(*next.esp.get())
}
