//! The clinical extraction engine's binary crate: config + bootstrap
//! (§4.13) and the CLI/HTTP surface (§4.14) that wires the library crates
//! (`ce-domain` through `ce-orchestrator`) into a runnable process.
//!
//! Grounded in `sa_gateway`'s split between `main`/`bootstrap`/`state`/`cli`/
//! `api` — generalized from the donor's agentic-gateway surface down to the
//! handful of operations §6 actually names.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
