//! Node-local lifecycle manager for ephemeral scratch volumes.
//!
//! This crate owns the durable catalog, the in-memory volume registry, the
//! deletion queue, the disk-pressure model, and the background pruner. It
//! does not speak any wire protocol: [`driver::Driver`] exposes a plain Rust
//! API that a serving layer (gRPC, a CLI, a test harness) calls into.

pub mod catalog;
pub mod config;
pub mod deletion;
pub mod disk;
pub mod driver;
pub mod error;
pub mod pressure;
pub mod pruner;
pub mod volume;

pub use config::Config;
pub use driver::Driver;
pub use error::{Error, Result};
