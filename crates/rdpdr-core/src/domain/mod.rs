//! Domain entities for device redirection.
//!
//! This module contains pure types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The innermost layer of the workspace.  Domain code has **no** imports from
//! OS APIs, file systems, threads, or printing backends, so it can be compiled
//! and tested anywhere.  Outer layers (the dispatch engine, the cache store,
//! the backends) depend on these types, never the other way round.

/// Request records and their exactly-once completion contract.
pub mod irp;

/// Encoded device names as they appear on the wire and in the cache.
pub mod name;
