//! # Kernel Driver Layer
//!
//! O núcleo mantém só o driver de que o log depende: a serial (COM1).
//! Timer e controladores de interrupção vivem em `arch` e `core::irq`;
//! o resto é de quem monta o sistema em cima do núcleo.

pub mod serial;
