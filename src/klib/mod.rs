//! Kernel Library (KLib).
//!
//! Utilitários internos sem dependência de hardware:
//! - `bitmap`: slots de swap.
//! - `test_framework`: suites de autoteste do boot.
//! - `testkit`: máquina simulada dos testes de cenário (só em `cfg(test)`).

pub mod bitmap;
pub mod test_framework;

#[cfg(test)]
pub mod testkit;

pub use bitmap::Bitmap;
