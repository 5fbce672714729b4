//! Tempo do núcleo: contador monotônico de ticks (jiffies).

pub mod clock;

pub use clock::Clock;
