// src/lib.rs

//! dnfdaemon
//!
//! D-Bus service exposing package management to unprivileged clients.
//! One client at a time holds the session lock and drives a pending
//! transaction through resolve, download and apply; progress comes back as
//! signals.
//!
//! # Architecture
//!
//! - `engine`: traits the package backend implements, plus an in-memory
//!   backend loaded from a TOML catalog
//! - `daemon`: session lock, watchdog, permission gate, transaction
//!   lifecycle and the bus interface
//! - `package` / `version`: package references and RPM version ordering

pub mod daemon;
pub mod engine;
mod error;
pub mod package;
pub mod version;

pub use daemon::{BusKind, DaemonConfig, DaemonService};
pub use error::{Error, Result};
pub use package::{Package, PackageRef};
