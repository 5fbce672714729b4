//! Testes das primitivas bloqueantes sobre a máquina simulada.

mod completion_test;
mod mutex_test;
mod waitqueue_test;
