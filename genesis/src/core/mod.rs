//! Deterministic, pure logic shared by the orchestration engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod normalize;
pub mod outcome;
pub mod router;
pub mod sentinel;
pub mod state;
pub mod types;
