//! Estados de uma tarefa e as transições permitidas.

/// Estados possíveis de uma tarefa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Executando em alguma CPU
    Running = 0,
    /// Na fila, esperando CPU
    Runnable = 1,
    /// Dormindo; sinais acordam
    Interruptible = 2,
    /// Dormindo; só o evento esperado acorda
    Uninterruptible = 3,
    /// Parada por SIGSTOP até SIGCONT
    Stopped = 4,
    /// Terminou; espera o pai recolher o código de saída
    Zombie = 5,
}

impl TaskState {
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Runnable,
            2 => Self::Interruptible,
            3 => Self::Uninterruptible,
            4 => Self::Stopped,
            _ => Self::Zombie,
        }
    }

    /// Tarefa fora da fila até alguém acordá-la.
    pub const fn is_sleeping(self) -> bool {
        matches!(self, Self::Interruptible | Self::Uninterruptible)
    }

    /// A tarefa pode executar?
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Running | Self::Runnable)
    }

    /// Transição válida?
    pub const fn can_transition_to(self, to: Self) -> bool {
        use TaskState::*;
        match (self, to) {
            (Zombie, _) => false,
            (_, Zombie) => matches!(self, Running),
            (Running, _) => true,
            (Runnable, Running | Stopped) => true,
            // Acordada antes de chegar a dormir
            (Interruptible | Uninterruptible, Runnable | Running) => true,
            (Stopped, Runnable) => true,
            _ => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Runnable => "runnable",
            Self::Interruptible => "sleeping",
            Self::Uninterruptible => "disk-sleep",
            Self::Stopped => "stopped",
            Self::Zombie => "zombie",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zombie_is_terminal() {
        for to in [TaskState::Running, TaskState::Runnable, TaskState::Stopped] {
            assert!(!TaskState::Zombie.can_transition_to(to));
        }
    }

    #[test]
    fn only_running_task_can_exit() {
        assert!(TaskState::Running.can_transition_to(TaskState::Zombie));
        assert!(!TaskState::Interruptible.can_transition_to(TaskState::Zombie));
        assert!(!TaskState::Stopped.can_transition_to(TaskState::Zombie));
    }

    #[test]
    fn stopped_resumes_through_runnable() {
        assert!(TaskState::Stopped.can_transition_to(TaskState::Runnable));
        assert!(!TaskState::Stopped.can_transition_to(TaskState::Running));
    }
}
