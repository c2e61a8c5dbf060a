//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod allow_list;
pub mod cycle;
pub mod diff;
pub mod endpoint;
pub mod preview;
pub mod summary;
pub mod types;
pub mod validate;
