//! Goal-graph orchestrator for teams of agents.
//!
//! Goals form a dependency graph. Each iteration the planner cuts a batch of
//! ready goals, the orchestrator runs their agents concurrently, and the
//! shared state store flushes the merged result to disk. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph, status transitions, planning).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, state file, child processes).
//!
//! [`orchestrator`] drives the loop over both; [`agents`] and [`tools`] hold the
//! executor contracts and the bundled demo teams.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
