/// Arquivo: sched/core/scheduler.rs
///
/// Propósito: Núcleo do escalonador.
/// Mantém a tabela de tarefas, delega a ordem de execução à política e faz a
/// troca de contexto entre tarefas em cada CPU.
///
/// Detalhes de Implementação:
/// - Um único lock (rank `RunQueue`) protege tabela, filas e timers.
/// - A troca acontece com o lock solto e IRQs desligadas. A tarefa que sai
///   só é liberada (`on_cpu = false`) pelo `finish_switch` de quem entra, e
///   outra CPU que a escolher espera esse momento.
/// - Nenhum lock atravessa o `switch_to`.
use super::super::policy::SchedPolicy;
use super::super::task::{Task, TaskId, TaskState, TaskTable};
use crate::arch::{run_guarded, switch_final, switch_to, Context, Cpu, CpuId, CpuOps};
use crate::core::smp::percpu::NO_TASK;
use crate::core::smp::{CpuData, CpuMask, Smp};
use crate::core::time::Clock;
use crate::mm::Asid;
use crate::sync::{LockRank, Spinlock, SpinlockGuard};
use crate::sys::{Errno, Signal};
use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::Ordering;

/// Erros das operações de controle de tarefas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// ID não resolve (nunca existiu ou já foi recolhida)
    NoSuchTask,
    /// Máscara sem nenhuma CPU online
    InvalidAffinity,
    /// A tarefa ainda não terminou
    NotExited,
    /// Operação proibida para a tarefa idle
    IdleTask,
}

impl SchedError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSuchTask => "tarefa inexistente",
            Self::InvalidAffinity => "afinidade sem CPU online",
            Self::NotExited => "tarefa ainda executando",
            Self::IdleTask => "operação inválida na idle",
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SchedError> for Errno {
    fn from(err: SchedError) -> Self {
        match err {
            SchedError::NoSuchTask => Errno::ESRCH,
            SchedError::InvalidAffinity => Errno::EINVAL,
            SchedError::NotExited => Errno::EAGAIN,
            SchedError::IdleTask => Errno::EPERM,
        }
    }
}

/// Gancho para carregar o address space da próxima tarefa.
///
/// Implementado pelo VMM; threads de kernel (sem address space) herdam o
/// que estiver carregado.
pub trait MmContext: Send + Sync {
    fn switch_mm(&self, next: Asid);
}

/// Parâmetros de criação de tarefa.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnOptions<'a> {
    pub name: &'a str,
    /// `None`: qualquer CPU
    pub affinity: Option<CpuMask>,
    pub aspace: Option<Asid>,
}

impl<'a> SpawnOptions<'a> {
    pub fn named(name: &'a str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

pub(super) struct SchedInner {
    pub(super) tasks: TaskTable,
    pub(super) policy: Box<dyn SchedPolicy>,
    /// Timers pendentes, ordenados por prazo (em ticks)
    pub(super) timers: BTreeSet<(u64, TaskId)>,
}

pub struct Scheduler {
    pub(super) smp: Arc<Smp>,
    pub(super) clock: Arc<Clock>,
    pub(super) inner: Spinlock<SchedInner>,
    mm: spin::Once<Arc<dyn MmContext>>,
}

impl Scheduler {
    pub fn new(smp: Arc<Smp>, clock: Arc<Clock>, policy: Box<dyn SchedPolicy>) -> Self {
        crate::kinfo!("(Sched) Iniciando escalonador. CPUs=", smp.nr_cpus());
        Self {
            smp,
            clock,
            inner: Spinlock::new(
                LockRank::RunQueue,
                SchedInner {
                    tasks: TaskTable::new(),
                    policy,
                    timers: BTreeSet::new(),
                },
            ),
            mm: spin::Once::new(),
        }
    }

    pub fn set_mm_context(&self, mm: Arc<dyn MmContext>) {
        self.mm.call_once(|| mm);
    }

    pub fn smp(&self) -> &Arc<Smp> {
        &self.smp
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub(super) fn lock(&self) -> SpinlockGuard<'_, SchedInner> {
        self.inner.lock_irqsave()
    }

    // =========================================================================
    // TAREFAS
    // =========================================================================

    /// Transforma o fluxo atual da CPU em sua tarefa idle.
    ///
    /// Chamado uma vez por CPU (BSP no boot, AP no `secondary_main`).
    pub fn init_cpu(&self) -> TaskId {
        let me = Cpu::current_id();
        let name = format!("idle/{}", me);
        let mut inner = self.lock();
        let id = inner.tasks.reserve();
        let task = Task::new(
            id,
            &name,
            me,
            CpuMask::single(me),
            None,
            None,
            Context::for_current(),
            true,
        );
        inner.tasks.install(Arc::new(task));
        let cpu = self.smp.cpu(me);
        cpu.set_idle_raw(id.raw());
        cpu.set_current_raw(id.raw());
        id
    }

    pub fn spawn<F>(self: &Arc<Self>, name: &str, entry: F) -> Result<TaskId, SchedError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with(SpawnOptions::named(name), entry)
    }

    /// Cria uma tarefa pronta para executar.
    ///
    /// O código de saída é o de [`Scheduler::exit_current`] ou 0 quando
    /// `entry` retorna (−1 se ela entrar em pânico num build hospedado).
    pub fn spawn_with<F>(self: &Arc<Self>, opts: SpawnOptions<'_>, entry: F) -> Result<TaskId, SchedError>
    where
        F: FnOnce() + Send + 'static,
    {
        let affinity = opts
            .affinity
            .unwrap_or(CpuMask::first_n(self.smp.nr_cpus()));
        if affinity.and(self.smp.online_mask()).is_empty() {
            return Err(SchedError::InvalidAffinity);
        }

        let parent = self.try_current().map(|t| t.id());
        let sched = self.clone();
        let body: Box<dyn FnOnce() + Send> = Box::new(entry);
        let trampoline: Box<dyn FnOnce() + Send> = Box::new(move || {
            sched.finish_switch();
            Cpu::irq_enable();
            let code = run_guarded(body);
            sched.exit_current(code)
        });

        let id = self.lock().tasks.reserve();
        let context = Context::spawn(opts.name, trampoline);
        let task = Arc::new(Task::new(
            id,
            opts.name,
            Cpu::current_id(),
            affinity,
            opts.aspace,
            parent,
            context,
            false,
        ));
        task.on_rq.store(true, Ordering::Release);

        let target = {
            let mut inner = self.lock();
            inner.tasks.install(task.clone());
            let target = self.select_cpu(&inner, &task);
            task.set_cpu(target);
            inner.policy.enqueue(target, id);
            target
        };
        self.kick(target);

        crate::kdebug!("(Sched) Tarefa criada pid=", id.pid(), " cpu=", target);
        Ok(id)
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.lock().tasks.get(id).cloned()
    }

    /// Tarefa corrente desta CPU, se o scheduler já foi iniciado nela.
    pub fn try_current(&self) -> Option<Arc<Task>> {
        let raw = self.smp.this_cpu().current_raw();
        if raw == NO_TASK {
            return None;
        }
        self.task(TaskId::from_raw(raw))
    }

    pub fn current(&self) -> Arc<Task> {
        match self.try_current() {
            Some(task) => task,
            None => panic!("scheduler não iniciado nesta CPU"),
        }
    }

    pub fn current_id(&self) -> TaskId {
        TaskId::from_raw(self.smp.this_cpu().current_raw())
    }

    pub fn nr_tasks(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn nr_queued(&self, cpu: CpuId) -> usize {
        self.lock().policy.nr_queued(cpu)
    }

    /// Foto do estado de todas as tarefas (diagnóstico e testes).
    pub fn snapshot(&self) -> Vec<(TaskId, TaskState, CpuId)> {
        self.lock()
            .tasks
            .iter()
            .map(|t| (t.id(), t.state(), t.cpu()))
            .collect()
    }

    /// Define o estado da tarefa corrente antes de dormir.
    pub fn set_current_state(&self, state: TaskState) {
        self.current().set_state(state);
    }

    /// Há sinal pendente que interrompe uma espera da tarefa corrente?
    pub fn signal_pending(&self) -> bool {
        self.try_current()
            .is_some_and(|t| t.signals.any_pending())
    }

    // =========================================================================
    // ACORDAR
    // =========================================================================

    /// Acorda uma tarefa adormecida (interrompível ou não).
    ///
    /// Retorna `false` se ela não estava dormindo.
    pub fn wake_up(&self, id: TaskId) -> bool {
        self.try_wake(id, false)
    }

    /// Acorda apenas se a espera for interrompível (entrega de sinal).
    pub fn wake_up_interruptible(&self, id: TaskId) -> bool {
        self.try_wake(id, true)
    }

    fn try_wake(&self, id: TaskId, interruptible_only: bool) -> bool {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get(id).cloned() else {
            return false;
        };
        match task.state() {
            TaskState::Interruptible => {}
            TaskState::Uninterruptible if !interruptible_only => {}
            _ => return false,
        }

        task.set_state(TaskState::Runnable);
        if task.on_rq.load(Ordering::Acquire) {
            // Ainda não saiu da CPU (ou é a idle): o schedule() dela vê Runnable
            let idle_cpu = task.is_idle().then(|| task.cpu());
            drop(inner);
            if let Some(cpu) = idle_cpu {
                self.kick(cpu);
            }
            return true;
        }
        task.on_rq.store(true, Ordering::Release);
        let target = self.select_cpu(&inner, &task);
        task.set_cpu(target);
        inner.policy.enqueue(target, id);
        drop(inner);

        self.kick(target);
        true
    }

    /// Escolhe a CPU para uma tarefa que vai para a fila.
    ///
    /// Prefere a última CPU; troca pela menos carregada da afinidade quando
    /// ela está estritamente mais ocupada.
    pub(super) fn select_cpu(&self, inner: &SchedInner, task: &Task) -> CpuId {
        let online = self.smp.online_mask();
        let mut allowed = task.affinity().and(online);
        if allowed.is_empty() {
            // CPU da afinidade saiu do ar: qualquer uma serve
            allowed = online;
        }
        let last = task.cpu();
        let mut best = match allowed.first() {
            Some(first) if !allowed.contains(last) => first,
            Some(_) => last,
            None => return Cpu::current_id(),
        };

        let load = |cpu: CpuId| {
            let data = self.smp.cpu(cpu);
            let busy = data.current_raw() != data.idle_raw();
            inner.policy.nr_queued(cpu) + busy as usize
        };
        let mut best_load = load(best);
        for cpu in allowed.iter() {
            let l = load(cpu);
            if l < best_load {
                best = cpu;
                best_load = l;
            }
        }
        best
    }

    /// Avisa a CPU alvo de que há trabalho novo na fila dela.
    pub(super) fn kick(&self, target: CpuId) {
        self.smp.send_reschedule(target);
    }

    // =========================================================================
    // TROCA DE CONTEXTO
    // =========================================================================

    /// Cede a CPU voluntariamente.
    pub fn yield_now(&self) {
        self.schedule();
    }

    /// Ponto de escalonamento.
    ///
    /// Se a tarefa corrente está dormindo, ela sai da fila até um `wake_up`;
    /// se continua executável, volta ao fim da fila (possivelmente de outra
    /// CPU, conforme a afinidade).
    pub fn schedule(&self) {
        let flags = Cpu::irq_disable_save();
        let me = Cpu::current_id();
        let cpu = self.smp.cpu(me);
        cpu.deferred.drain();
        cpu.clear_need_resched();

        let mut inner = self.lock();
        let Some(prev) = inner.tasks.get(TaskId::from_raw(cpu.current_raw())).cloned() else {
            drop(inner);
            Cpu::irq_restore(flags);
            return;
        };
        let migrated_to = self.put_prev(&mut inner, &prev, me);
        let next = self.pick_next(&mut inner, me);

        if Arc::ptr_eq(&prev, &next) {
            drop(inner);
            if let Some(target) = migrated_to {
                self.kick(target);
            }
            if prev.is_idle() && prev.state().is_sleeping() {
                // Idle esperando um evento: sem ninguém para rodar, só resta
                // atender IPIs e aguardar a próxima interrupção.
                self.smp.handle_ipis();
                if flags.were_enabled() {
                    Cpu::irq_enable();
                    Cpu::halt();
                } else {
                    Cpu::pause();
                }
            }
            // Depois do halt: um wake_up pode ter chegado durante ele
            let inner = self.lock();
            if prev.state() == TaskState::Runnable {
                prev.set_state(TaskState::Running);
            }
            drop(inner);
            Cpu::irq_restore(flags);
            return;
        }

        self.prepare_switch(cpu, &prev, &next);
        drop(inner);
        if let Some(target) = migrated_to {
            self.kick(target);
        }
        self.wait_off_cpu_and_load(cpu, &next);

        // SAFETY: prev é a tarefa corrente desta CPU; next foi reservada por
        // esta CPU (on_cpu) e seu contexto está parado.
        unsafe { switch_to(&prev.context, &next.context) };

        // Retomada (possivelmente em outra CPU)
        self.finish_switch();
        Cpu::irq_restore(flags);
    }

    /// Decide o destino da tarefa que está saindo. Retorna a CPU remota em
    /// cuja fila ela foi parar, se houver.
    fn put_prev(&self, inner: &mut SchedInner, prev: &Task, me: CpuId) -> Option<CpuId> {
        if prev.is_idle() {
            return None;
        }
        let state = prev.state();
        if state.is_runnable() && prev.take_stop_request() {
            prev.set_state(TaskState::Stopped);
            prev.on_rq.store(false, Ordering::Release);
            return None;
        }

        let keep = match state {
            TaskState::Running | TaskState::Runnable => true,
            TaskState::Interruptible => prev.signals.any_pending(),
            _ => false,
        };
        if !keep {
            prev.on_rq.store(false, Ordering::Release);
            return None;
        }

        prev.set_state(TaskState::Runnable);
        let target = self.select_cpu(inner, prev);
        prev.set_cpu(target);
        inner.policy.enqueue(target, prev.id());
        (target != me).then_some(target)
    }

    fn pick_next(&self, inner: &mut SchedInner, me: CpuId) -> Arc<Task> {
        while let Some(id) = inner.policy.pick_next(me) {
            if let Some(task) = inner.tasks.get(id) {
                return task.clone();
            }
        }
        let idle = TaskId::from_raw(self.smp.cpu(me).idle_raw());
        match inner.tasks.get(idle) {
            Some(task) => task.clone(),
            None => panic!("CPU sem tarefa idle"),
        }
    }

    /// Publica `next` como corrente. Chamado com o lock segurado.
    fn prepare_switch(&self, cpu: &CpuData, prev: &Task, next: &Task) {
        if next.state() == TaskState::Runnable {
            next.set_state(TaskState::Running);
        }
        next.set_cpu(cpu.id());
        cpu.set_current_raw(next.id().raw());
        cpu.set_prev_raw(prev.id().raw());
        cpu.count_switch();
    }

    /// Espera `next` ser liberada pela CPU anterior e carrega seu address space.
    fn wait_off_cpu_and_load(&self, cpu: &CpuData, next: &Task) {
        while next.on_cpu.load(Ordering::Acquire) {
            Cpu::pause();
        }
        next.on_cpu.store(true, Ordering::Release);

        if let Some(asid) = next.aspace() {
            if cpu.loaded_space() != asid.raw() {
                if let Some(mm) = self.mm.get() {
                    mm.switch_mm(asid);
                }
            }
        }
    }

    /// Primeira coisa que uma tarefa faz ao ganhar a CPU: libera quem saiu.
    pub(crate) fn finish_switch(&self) {
        let cpu = self.smp.this_cpu();
        let prev = cpu.take_prev_raw();
        if prev == NO_TASK {
            return;
        }
        if let Some(task) = self.task(TaskId::from_raw(prev)) {
            task.on_cpu.store(false, Ordering::Release);
        }
    }

    // =========================================================================
    // SAÍDA
    // =========================================================================

    /// Termina a tarefa corrente. Vira zumbi até o pai recolher o código.
    pub fn exit_current(&self, code: i32) -> ! {
        let cur = self.current();
        if cur.is_idle() {
            panic!("tarefa idle tentou terminar");
        }
        let _flags = Cpu::irq_disable_save();

        {
            let _inner = self.lock();
            cur.set_exit_code(code);
            cur.set_state(TaskState::Zombie);
            cur.on_rq.store(false, Ordering::Release);
        }
        crate::kdebug!("(Sched) Tarefa terminou pid=", cur.id().pid(), " código=", code);

        if let Some(parent) = cur.parent().and_then(|p| self.task(p)) {
            parent.signals.raise(Signal::SigChld);
            parent.child_exit.wake_all(self);
        }

        let me = Cpu::current_id();
        let cpu = self.smp.cpu(me);
        cpu.deferred.drain();
        let mut inner = self.lock();
        let next = self.pick_next(&mut inner, me);
        self.prepare_switch(cpu, &cur, &next);
        drop(inner);
        self.wait_off_cpu_and_load(cpu, &next);

        // A tabela mantém next viva enquanto ela executa; cur fica até o reap,
        // que espera on_cpu cair (finish_switch de next).
        let next_ctx: *const Context = &next.context;
        drop(next);
        drop(cur);
        // SAFETY: next_ctx aponta para o contexto de uma tarefa registrada
        // que esta CPU acabou de reservar.
        unsafe { switch_final(&*next_ctx) }
    }

    /// Recolhe o código de saída de uma tarefa zumbi e libera seu slot.
    pub fn reap(&self, id: TaskId) -> Result<i32, SchedError> {
        let mut inner = self.lock();
        let task = inner.tasks.get(id).ok_or(SchedError::NoSuchTask)?;
        if task.state() != TaskState::Zombie || task.is_on_cpu() {
            return Err(SchedError::NotExited);
        }
        let code = task.exit_code();
        inner.tasks.remove(id);
        Ok(code)
    }

    /// Espera uma tarefa terminar e recolhe seu código de saída.
    pub fn wait_for(&self, id: TaskId) -> Result<i32, SchedError> {
        let me = self.current();
        loop {
            match self.reap(id) {
                Err(SchedError::NotExited) => {}
                other => return other,
            }
            let task = self.task(id).ok_or(SchedError::NoSuchTask)?;
            if task.state() == TaskState::Zombie || task.parent() != Some(me.id()) {
                // Terminou mas o contexto ainda não foi liberado, ou não somos
                // o pai (ninguém nos acordaria)
                self.yield_now();
                continue;
            }
            me.child_exit
                .wait_event(self, || task.state() == TaskState::Zombie);
        }
    }
}
