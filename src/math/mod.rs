//! Pure math helpers, no I/O.

pub mod reward;
