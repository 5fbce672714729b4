//! Tarefas: TCB, estados e a tabela que as indexa.

mod state;
mod table;
#[allow(clippy::module_inception)]
mod task;

pub use state::TaskState;
pub use table::TaskTable;
pub use task::{Task, TaskId};
