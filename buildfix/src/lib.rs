//! Autonomous build-repair agent for Android projects.
//!
//! `buildfix` provisions a Docker sandbox, asks a decision oracle for the next
//! shell action, runs it through a persistent interactive shell and loops
//! until an artifact is built or the cycle budget runs out. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (terminal stream parsing, decision
//!   parsing, budget, failure rules). No I/O.
//! - **[`io`]**: Side-effecting operations (sandbox, shell channel, oracle,
//!   cache, filesystem, git). Behind traits where tests need doubles.
//! - **[`commands`]**: The registry of actions the oracle may invoke.
//!
//! Orchestration modules ([`step`], [`looping`], [`classify`], [`run`],
//! [`clean`], [`report`]) combine the two to implement CLI commands.

pub mod classify;
pub mod clean;
pub mod commands;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod report;
pub mod run;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
