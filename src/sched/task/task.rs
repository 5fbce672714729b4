/// Arquivo: sched/task/task.rs
///
/// Propósito: Estrutura de controle de uma tarefa (TCB).
/// Guarda o que o scheduler precisa para decidir e trocar: estado, CPU,
/// afinidade, address space, contexto salvo e sinais pendentes.
///
/// Detalhes de Implementação:
/// - Campos mutáveis são atômicos; mudanças de estado que afetam filas são
///   feitas sob o lock do scheduler.
/// - `on_rq`: a tarefa está na fila ou é a corrente de alguma CPU.
/// - `on_cpu`: o contexto ainda está em uso por uma CPU (entre o
///   `switch_to` de saída e o `finish_switch` de quem entrou).
use super::state::TaskState;
use crate::arch::{Context, CpuId};
use crate::core::smp::CpuMask;
use crate::mm::Asid;
use crate::sync::WaitQueue;
use crate::sys::SignalSet;
use alloc::string::String;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Identificador de tarefa: índice na tabela + geração.
///
/// Um ID de tarefa já recolhida nunca volta a resolver, mesmo que o slot
/// seja reutilizado.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(super) const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Nunca é zero (gerações começam em 1).
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub(super) const fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    pub(super) const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Número exposto ao userspace (getpid).
    pub const fn pid(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32 + 1
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}#{})", self.pid(), self.generation())
    }
}

const NO_DEADLINE: u64 = u64::MAX;

pub struct Task {
    id: TaskId,
    name: String,
    state: AtomicU8,
    /// Última CPU (ou a fila onde está enfileirada)
    cpu: AtomicUsize,
    affinity: AtomicU32,
    aspace: AtomicU64,
    parent: Option<TaskId>,
    exit_code: AtomicI32,
    deadline: AtomicU64,
    stop_pending: AtomicBool,
    is_idle: bool,
    pub(crate) on_rq: AtomicBool,
    pub(crate) on_cpu: AtomicBool,
    pub(crate) context: Context,
    /// Sinais pendentes
    pub signals: SignalSet,
    /// Onde o pai espera filhos terminarem
    pub child_exit: WaitQueue,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        cpu: CpuId,
        affinity: CpuMask,
        aspace: Option<Asid>,
        parent: Option<TaskId>,
        context: Context,
        is_idle: bool,
    ) -> Self {
        let state = if is_idle {
            TaskState::Running
        } else {
            TaskState::Runnable
        };
        Self {
            id,
            name: String::from(name),
            state: AtomicU8::new(state as u8),
            cpu: AtomicUsize::new(cpu),
            affinity: AtomicU32::new(affinity.bits()),
            aspace: AtomicU64::new(aspace.map_or(0, Asid::raw)),
            parent,
            exit_code: AtomicI32::new(0),
            deadline: AtomicU64::new(NO_DEADLINE),
            stop_pending: AtomicBool::new(false),
            is_idle,
            on_rq: AtomicBool::new(is_idle),
            on_cpu: AtomicBool::new(is_idle),
            context,
            signals: SignalSet::new(),
            child_exit: WaitQueue::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, to: TaskState) {
        let from = self.state();
        debug_assert!(
            from == to || from.can_transition_to(to),
            "transição de estado inválida"
        );
        self.state.store(to as u8, Ordering::Release);
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu.load(Ordering::Acquire)
    }

    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Release);
    }

    pub fn affinity(&self) -> CpuMask {
        CpuMask::from_bits(self.affinity.load(Ordering::Acquire))
    }

    pub(crate) fn set_affinity(&self, mask: CpuMask) {
        self.affinity.store(mask.bits(), Ordering::Release);
    }

    /// Address space de usuário; `None` para threads de kernel.
    pub fn aspace(&self) -> Option<Asid> {
        match self.aspace.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Asid::from_raw(raw)),
        }
    }

    pub fn set_aspace(&self, asid: Option<Asid>) {
        self.aspace.store(asid.map_or(0, Asid::raw), Ordering::Release);
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    pub(crate) fn deadline(&self) -> Option<u64> {
        match self.deadline.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            d => Some(d),
        }
    }

    pub(crate) fn set_deadline(&self, deadline: Option<u64>) {
        self.deadline
            .store(deadline.unwrap_or(NO_DEADLINE), Ordering::Release);
    }

    pub(crate) fn request_stop(&self, on: bool) {
        self.stop_pending.store(on, Ordering::Release);
    }

    pub(crate) fn take_stop_request(&self) -> bool {
        self.stop_pending.swap(false, Ordering::AcqRel)
    }

    /// Está executando em alguma CPU agora?
    pub fn is_on_cpu(&self) -> bool {
        self.on_cpu.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("cpu", &self.cpu())
            .finish()
    }
}
