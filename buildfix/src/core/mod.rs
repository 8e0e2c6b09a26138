//! Deterministic, pure logic shared by the buildfix runtime.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod ansi;
pub mod budget;
pub mod classifier;
pub mod decision;
pub mod framing;
pub mod text;
pub mod types;
