//! Request records (I/O request packets) for redirected devices.
//!
//! An [`Irp`] is one unit of device work – create, close, write or
//! device-control – produced by the transport and handed to a device.
//!
//! # Exactly-once consumption
//!
//! Every record must be either **completed** (normal path) or **discarded**
//! (teardown or error path) – never both, never neither.  Rust ownership
//! enforces this directly:
//!
//! - [`Irp::complete`] and [`Irp::discard`] take the record by value, so a
//!   record cannot be consumed twice.
//! - Dropping a record that was neither completed nor discarded discards it,
//!   so a record cannot silently disappear.
//!
//! The completion and discard actions are provided by the transport through
//! the [`IrpResponder`] trait.

use std::fmt;
use std::sync::mpsc::Sender;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::status::NtStatus;

const IRP_MJ_CREATE: u32 = 0x0000_0000;
const IRP_MJ_CLOSE: u32 = 0x0000_0002;
const IRP_MJ_WRITE: u32 = 0x0000_0004;
const IRP_MJ_DEVICE_CONTROL: u32 = 0x0000_000E;

/// The operation requested by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorFunction {
    Create,
    Close,
    Write,
    DeviceControl,
    /// Any major function a printer does not implement (read, query, …).
    Unsupported(u32),
}

impl From<u32> for MajorFunction {
    fn from(value: u32) -> Self {
        match value {
            IRP_MJ_CREATE => MajorFunction::Create,
            IRP_MJ_CLOSE => MajorFunction::Close,
            IRP_MJ_WRITE => MajorFunction::Write,
            IRP_MJ_DEVICE_CONTROL => MajorFunction::DeviceControl,
            other => MajorFunction::Unsupported(other),
        }
    }
}

impl From<MajorFunction> for u32 {
    fn from(value: MajorFunction) -> Self {
        match value {
            MajorFunction::Create => IRP_MJ_CREATE,
            MajorFunction::Close => IRP_MJ_CLOSE,
            MajorFunction::Write => IRP_MJ_WRITE,
            MajorFunction::DeviceControl => IRP_MJ_DEVICE_CONTROL,
            MajorFunction::Unsupported(code) => code,
        }
    }
}

/// What the transport receives when a record completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrpReply {
    pub device_id: u32,
    pub completion_id: u32,
    pub io_status: NtStatus,
    pub output: Bytes,
}

/// Completion and discard actions supplied by the transport.
pub trait IrpResponder: Send {
    /// Sends the completion for a record back to the server.
    fn complete(self: Box<Self>, reply: IrpReply);

    /// Releases a record that will never be completed.
    fn discard(self: Box<Self>, completion_id: u32);
}

/// A request record.
pub struct Irp {
    pub device_id: u32,
    pub completion_id: u32,
    /// Target job id for close/write.
    pub file_id: u32,
    pub major_function: MajorFunction,
    /// Read-only request body.
    pub input: Bytes,
    /// Response body being built by the handler.
    pub output: BytesMut,
    pub io_status: NtStatus,
    responder: Option<Box<dyn IrpResponder>>,
}

impl Irp {
    pub fn new(
        device_id: u32,
        completion_id: u32,
        file_id: u32,
        major_function: MajorFunction,
        input: Bytes,
        responder: Box<dyn IrpResponder>,
    ) -> Self {
        Self {
            device_id,
            completion_id,
            file_id,
            major_function,
            input,
            output: BytesMut::new(),
            io_status: NtStatus::SUCCESS,
            responder: Some(responder),
        }
    }

    /// Completes the record, handing the output and status to the transport.
    pub fn complete(mut self) {
        if let Some(responder) = self.responder.take() {
            let reply = IrpReply {
                device_id: self.device_id,
                completion_id: self.completion_id,
                io_status: self.io_status,
                output: std::mem::take(&mut self.output).freeze(),
            };
            trace!(
                completion_id = reply.completion_id,
                status = %reply.io_status,
                "completing request"
            );
            responder.complete(reply);
        }
    }

    /// Discards the record without completing it.
    pub fn discard(mut self) {
        if let Some(responder) = self.responder.take() {
            debug!(completion_id = self.completion_id, "discarding request");
            responder.discard(self.completion_id);
        }
    }
}

impl Drop for Irp {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            debug!(
                completion_id = self.completion_id,
                "request dropped without completion, discarding"
            );
            responder.discard(self.completion_id);
        }
    }
}

impl fmt::Debug for Irp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Irp")
            .field("device_id", &self.device_id)
            .field("completion_id", &self.completion_id)
            .field("file_id", &self.file_id)
            .field("major_function", &self.major_function)
            .field("input_len", &self.input.len())
            .field("output_len", &self.output.len())
            .field("io_status", &self.io_status)
            .finish()
    }
}

// ── Channel-backed responder ──────────────────────────────────────────────────

/// How a record was consumed, as observed by a [`ChannelResponder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrpOutcome {
    Completed(IrpReply),
    Discarded { completion_id: u32 },
}

impl IrpOutcome {
    pub fn completion_id(&self) -> u32 {
        match self {
            IrpOutcome::Completed(reply) => reply.completion_id,
            IrpOutcome::Discarded { completion_id } => *completion_id,
        }
    }
}

/// An [`IrpResponder`] that forwards outcomes into an `mpsc` channel.
///
/// Used by the command-line front end and by tests to observe completions
/// produced on a worker thread.
#[derive(Clone)]
pub struct ChannelResponder {
    tx: Sender<IrpOutcome>,
}

impl ChannelResponder {
    pub fn new(tx: Sender<IrpOutcome>) -> Self {
        Self { tx }
    }
}

impl IrpResponder for ChannelResponder {
    fn complete(self: Box<Self>, reply: IrpReply) {
        // The receiver may already be gone during teardown.
        let _ = self.tx.send(IrpOutcome::Completed(reply));
    }

    fn discard(self: Box<Self>, completion_id: u32) {
        let _ = self.tx.send(IrpOutcome::Discarded { completion_id });
    }
}
