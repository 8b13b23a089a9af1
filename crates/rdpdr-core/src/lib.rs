//! # rdpdr-core
//!
//! Shared library for printer device redirection containing the printer
//! control-message codec, the announce payload, channel status codes, and the
//! request record (`Irp`) exchanged between the transport and a device.
//!
//! This crate is pure: it has no dependencies on the file system, threads, or
//! printing backends.  The `rdpdr-printer` crate builds the dispatch engine,
//! the configuration cache and device registration on top of it.
//!
//! # Architecture overview (for beginners)
//!
//! A remote-desktop session can redirect local peripherals to the remote
//! machine.  For printers, two kinds of traffic flow over the device channel:
//!
//! - **Control messages** – the server tells the client that a printer was
//!   added, updated, deleted or renamed so that the client can cache the
//!   printer's configuration across sessions.  `protocol` decodes them.
//!
//! - **Request records** – create/write/close requests for print jobs.  They
//!   are modelled by [`domain::irp::Irp`] and must be consumed exactly once.
//!
//! - **`status`** – NTSTATUS values carried in completed requests, and the
//!   channel return codes used to report fatal failures.

pub mod domain;
pub mod protocol;
pub mod status;

// Re-export the most-used types at the crate root so callers can write
// `rdpdr_core::Irp` instead of `rdpdr_core::domain::irp::Irp`.
pub use domain::irp::{
    ChannelResponder, Irp, IrpOutcome, IrpReply, IrpResponder, MajorFunction,
};
pub use domain::name::EncodedName;
pub use protocol::announce::AnnouncePayload;
pub use protocol::codec::{decode_printer_message, encode_printer_message, ProtocolError};
pub use protocol::messages::PrinterMessage;
pub use protocol::sequence::SequenceCounter;
pub use status::{ChannelStatus, NtStatus};
