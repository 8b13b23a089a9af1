//! Application layer use cases for printer redirection.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure protocol types in `rdpdr-core`) and the infrastructure (spool
//! files, the on-disk cache, the config file).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a session goal (e.g., "run a
//!   print request on the device's worker thread").
//! - **Depend on abstractions** (the `Printer` / `PrintJob` traits) rather
//!   than a concrete print system, so backends can be swapped.
//!
//! # Sub-modules
//!
//! - **`irp_handlers`**   – What each request kind (create, write, close,
//!   device control) does to the printer's jobs.
//!
//! - **`dispatch`**       – One `PrinterDevice` per printer: request queue,
//!   worker thread, fault state and teardown.
//!
//! - **`cache_events`**   – Applies add / update / delete / rename control
//!   messages to the configuration cache.
//!
//! - **`registration`**   – Turns backend printers into started devices.
//!
//! - **`device_manager`** – The session's registry of devices; routes
//!   requests and control messages by device id.

pub mod cache_events;
pub mod device_manager;
pub mod dispatch;
pub mod irp_handlers;
pub mod registration;
