//! Testes do scheduler sobre a HAL simulada.

mod lifecycle;
