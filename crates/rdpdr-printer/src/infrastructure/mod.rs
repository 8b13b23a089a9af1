//! Infrastructure layer for the printer redirection client.
//!
//! Contains the OS-facing adapters: printer backends (spool directory and
//! in-memory), the configuration cache on disk, and the TOML configuration
//! file.
//!
//! **Dependency rule**: this layer may depend on `rdpdr_core`, but MUST NOT
//! import from the `application` layer.

pub mod backend;
pub mod storage;
