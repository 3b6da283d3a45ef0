//! Command implementations
//!
//! Each subcommand loads the [`shared::Environment`], drives the core, and
//! renders the result on stdout as text or JSON.

pub mod ca;
pub mod create;
pub mod inspect;
pub mod power;
pub mod rebuild;
pub mod remove;
pub mod shared;
pub mod trust;
