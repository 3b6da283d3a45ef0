//! Core library for burrow
//!
//! burrow provisions development containers bound to git worktrees on a local
//! or remote container runtime, and secures SSH access to them with a private
//! certificate authority. This crate holds the lifecycle pipelines and their
//! collaborators: identity, port allocation, the CA, the container runtime
//! adapter, the client trust store, and connection switching.

pub mod ca;
pub mod cleanup;
pub mod config;
pub mod errors;
pub mod identity;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod ports;
pub mod runtime;
pub mod trust;
pub mod trust_sync;
pub mod worktree;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
