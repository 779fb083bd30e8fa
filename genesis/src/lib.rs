//! Durable agent-network engine for sandboxed code generation.
//!
//! A task event starts one workflow run. The run creates a sandbox, seeds the
//! conversation from the project's history, and iterates a router/agent loop
//! in which a coding agent calls sandbox tools until it emits a task summary
//! or the iteration bound is reached. Two summarizers then turn the summary
//! into a title and a reply, and exactly one message is persisted.
//!
//! - **[`core`]**: Pure, deterministic logic (state merge, routing, sentinel
//!   detection, output normalization, outcome classification).
//! - **[`io`]**: Side-effecting adapters (sandbox, model, conversation store,
//!   step journal, run records, config).
//!
//! [`tools`], [`agents`], [`network`] and [`workflow`] coordinate the two.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod network;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod workflow;
