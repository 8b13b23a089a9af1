//! Storage infrastructure: everything this crate keeps on disk.
//!
//! - `config` – the TOML application configuration, read from the platform
//!   config directory with sensible defaults on first run.
//! - `cache`  – the per-printer configuration cache that the server keeps in
//!   sync through printer control messages.
//!
//! Both are plain synchronous file-system adapters; neither spawns threads.

pub mod cache;
pub mod config;
