//! Side-effecting adapters: processes, containers, the oracle and on-disk state.

pub mod atomic;
pub mod cache;
pub mod channel;
pub mod config;
pub mod git;
pub mod oracle;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod run_state;
pub mod sandbox;
pub mod session;
pub mod spinner;
pub mod transcript;
pub mod transport;
pub mod workspace;
