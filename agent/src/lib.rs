//! Agent orchestration and plan-application engine.
//!
//! One cycle turns a prompt into applied changes: build a bounded project
//! context, ask the planner for a plan, validate it, apply it inside the
//! sandboxed project root, and infer which route to preview. Every step is
//! reported to a best-effort trace sink. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: pure, deterministic logic (action types, validation, diffing,
//!   endpoint normalization, preview inference). No I/O.
//! - **[`io`]**: side-effecting adapters (filesystem, processes, HTTP, config).
//!
//! [`orchestrator`] composes the two into [`orchestrator::Agent`].

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
