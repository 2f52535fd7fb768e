//! Mirror private Git repositories to public destinations.
//!
//! `gitmirror` is a CLI tool; the library surface exists for the binary and
//! the integration tests and is not a stable API.
//!
//! The engine lives in [`sync`]: a per-repository orchestrator that prepares
//! a unified work directory ([`sync::Workspace`]), reads the durable journal
//! ([`sync::SyncState`]), replicates each branch through a three-mode state
//! machine ([`sync::BranchReplicator`]), and writes the journal back to the
//! destination's `sync_state` branch.

pub mod config;
pub mod git;
pub mod report;
pub mod sync;
