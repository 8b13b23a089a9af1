//! Request-record handlers of a printer device.
//!
//! Each handler fills in the record's output buffer and status; the caller
//! (the dispatch core) completes the record when the handler returns `Ok`
//! and discards it otherwise.
//!
//! | Operation      | Output                          | Failure status               |
//! |----------------|---------------------------------|------------------------------|
//! | create         | job id `u32`                    | `STATUS_PRINT_QUEUE_FULL`    |
//! | close          | 4 zero bytes                    | `STATUS_UNSUCCESSFUL`        |
//! | write          | length `u32` + 1 padding byte   | `STATUS_UNSUCCESSFUL`        |
//! | device-control | output buffer length `u32` = 0  | –                            |
//! | other          | empty                           | `STATUS_NOT_SUPPORTED`       |
//!
//! Per-request failures (no such job, backend refused a job) only change the
//! status.  Two things are errors: a write whose input is shorter than it
//! claims, and a job that fails to take the written bytes.

use std::sync::Arc;

use bytes::{Buf, BufMut};
use rdpdr_core::{ChannelStatus, Irp, MajorFunction, NtStatus, ProtocolError, SequenceCounter};
use thiserror::Error;
use tracing::{debug, warn};

use crate::infrastructure::backend::{BackendError, Printer};

/// Size of the fixed part of a write request: length, offset and padding.
pub const WRITE_HEADER_SIZE: usize = 32;

/// Errors that stop a device from processing further requests.
#[derive(Debug, Error)]
pub enum IrpError {
    #[error("malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("print job {job_id} rejected written data: {source}")]
    JobWrite {
        job_id: u32,
        #[source]
        source: BackendError,
    },
}

impl IrpError {
    pub fn status_code(&self) -> ChannelStatus {
        match self {
            IrpError::Protocol(e) => e.status_code(),
            IrpError::JobWrite { .. } => ChannelStatus::ERROR_INTERNAL_ERROR,
        }
    }
}

/// What the handlers need from their device.
pub struct PrinterContext {
    printer: Arc<dyn Printer>,
    sequence: SequenceCounter,
}

impl PrinterContext {
    /// Job ids start at 1; 0 is the "no job" id returned on failure.
    pub fn new(printer: Arc<dyn Printer>) -> Self {
        Self {
            printer,
            sequence: SequenceCounter::starting_at(1),
        }
    }

    pub fn printer(&self) -> &Arc<dyn Printer> {
        &self.printer
    }
}

/// Runs the handler for `irp.major_function`.
///
/// # Errors
///
/// Returns [`IrpError`] when the record must be discarded and the device
/// stopped.
pub fn handle(ctx: &PrinterContext, irp: &mut Irp) -> Result<(), IrpError> {
    match irp.major_function {
        MajorFunction::Create => {
            create(ctx, irp);
            Ok(())
        }
        MajorFunction::Close => {
            close(ctx, irp);
            Ok(())
        }
        MajorFunction::Write => write(ctx, irp),
        MajorFunction::DeviceControl => {
            device_control(irp);
            Ok(())
        }
        MajorFunction::Unsupported(major) => {
            unsupported(irp, major);
            Ok(())
        }
    }
}

fn create(ctx: &PrinterContext, irp: &mut Irp) {
    let sequence = ctx.sequence.next();
    match ctx.printer.create_print_job(sequence) {
        Ok(job) => {
            irp.output.put_u32_le(job.id());
        }
        Err(e) => {
            warn!(printer = ctx.printer.name(), "failed to create print job: {e}");
            irp.output.put_u32_le(0);
            irp.io_status = NtStatus::PRINT_QUEUE_FULL;
        }
    }
}

fn close(ctx: &PrinterContext, irp: &mut Irp) {
    match ctx.printer.find_print_job(irp.file_id) {
        Some(job) => {
            if let Err(e) = job.close() {
                warn!(job_id = irp.file_id, "failed to close print job: {e}");
                irp.io_status = NtStatus::UNSUCCESSFUL;
            } else {
                debug!(job_id = irp.file_id, "print job closed");
            }
        }
        None => {
            debug!(job_id = irp.file_id, "close for unknown print job");
            irp.io_status = NtStatus::UNSUCCESSFUL;
        }
    }
    irp.output.put_bytes(0, 4);
}

fn write(ctx: &PrinterContext, irp: &mut Irp) -> Result<(), IrpError> {
    let mut input = irp.input.clone();
    if input.remaining() < WRITE_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            context: "Write",
            needed: WRITE_HEADER_SIZE,
            available: input.remaining(),
        }
        .into());
    }
    let length = input.get_u32_le();
    // The offset is ignored: jobs are spooled append-only.
    let _offset = input.get_u64_le();
    input.advance(20);

    let length_usize = length as usize;
    if input.remaining() < length_usize {
        return Err(ProtocolError::InsufficientData {
            context: "Write.Data",
            needed: length_usize,
            available: input.remaining(),
        }
        .into());
    }
    let data = input.split_to(length_usize);

    let written = match ctx.printer.find_print_job(irp.file_id) {
        Some(job) => {
            job.write(&data).map_err(|source| IrpError::JobWrite {
                job_id: irp.file_id,
                source,
            })?;
            length
        }
        None => {
            debug!(job_id = irp.file_id, "write for unknown print job");
            irp.io_status = NtStatus::UNSUCCESSFUL;
            0
        }
    };

    irp.output.put_u32_le(written);
    irp.output.put_u8(0);
    Ok(())
}

fn device_control(irp: &mut Irp) {
    irp.output.put_u32_le(0);
}

fn unsupported(irp: &mut Irp, major: u32) {
    debug!(major_function = major, "unsupported request on printer device");
    irp.io_status = NtStatus::NOT_SUPPORTED;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend::{MockPrintJob, MockPrinter, PrintJob};
    use bytes::{Bytes, BytesMut};
    use rdpdr_core::{ChannelResponder, IrpOutcome};
    use std::sync::mpsc;

    fn irp(major: MajorFunction, file_id: u32, input: Vec<u8>) -> (Irp, mpsc::Receiver<IrpOutcome>) {
        let (tx, rx) = mpsc::channel();
        let irp = Irp::new(
            1,
            42,
            file_id,
            major,
            Bytes::from(input),
            Box::new(ChannelResponder::new(tx)),
        );
        (irp, rx)
    }

    fn write_input(length: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(length);
        buf.put_u64_le(0xDEAD_BEEF);
        buf.put_bytes(0, 20);
        buf.put_slice(data);
        buf.to_vec()
    }

    fn ctx_with(printer: MockPrinter) -> PrinterContext {
        PrinterContext::new(Arc::new(printer))
    }

    // ── create ────────────────────────────────────────────────────────────────

    #[test]
    fn test_create_writes_job_id_from_sequence() {
        // Arrange
        let mut printer = MockPrinter::new();
        printer.expect_create_print_job().returning(|seq| {
            let mut job = MockPrintJob::new();
            job.expect_id().return_const(seq);
            Ok(Arc::new(job) as Arc<dyn PrintJob>)
        });
        let ctx = ctx_with(printer);
        let (mut first, _rx1) = irp(MajorFunction::Create, 0, vec![]);
        let (mut second, _rx2) = irp(MajorFunction::Create, 0, vec![]);

        // Act
        handle(&ctx, &mut first).unwrap();
        handle(&ctx, &mut second).unwrap();

        // Assert
        assert_eq!(&first.output[..], &1u32.to_le_bytes());
        assert_eq!(&second.output[..], &2u32.to_le_bytes());
        assert!(first.io_status.is_success());
    }

    #[test]
    fn test_create_failure_is_print_queue_full() {
        let mut printer = MockPrinter::new();
        printer
            .expect_create_print_job()
            .returning(|_| Err(BackendError::Simulated("create")));
        printer.expect_name().return_const("Office".to_string());
        let ctx = ctx_with(printer);
        let (mut request, _rx) = irp(MajorFunction::Create, 0, vec![]);

        handle(&ctx, &mut request).unwrap();

        assert_eq!(&request.output[..], &[0, 0, 0, 0]);
        assert_eq!(request.io_status, NtStatus::PRINT_QUEUE_FULL);
    }

    // ── close ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_close_unknown_job_completes_with_unsuccessful() {
        // Arrange
        let mut printer = MockPrinter::new();
        printer.expect_find_print_job().returning(|_| None);
        let ctx = ctx_with(printer);
        let (mut request, rx) = irp(MajorFunction::Close, 99, vec![]);

        // Act
        handle(&ctx, &mut request).unwrap();
        request.complete();

        // Assert
        match rx.recv().unwrap() {
            IrpOutcome::Completed(reply) => {
                assert_eq!(reply.io_status, NtStatus::UNSUCCESSFUL);
                assert_eq!(&reply.output[..], &[0, 0, 0, 0]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_close_known_job_closes_it() {
        let mut printer = MockPrinter::new();
        printer.expect_find_print_job().returning(|_| {
            let mut job = MockPrintJob::new();
            job.expect_close().times(1).returning(|| Ok(()));
            Some(Arc::new(job) as Arc<dyn PrintJob>)
        });
        let ctx = ctx_with(printer);
        let (mut request, _rx) = irp(MajorFunction::Close, 1, vec![]);

        handle(&ctx, &mut request).unwrap();

        assert!(request.io_status.is_success());
    }

    // ── write ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_write_forwards_exactly_length_bytes() {
        // Arrange
        let mut printer = MockPrinter::new();
        printer.expect_find_print_job().returning(|_| {
            let mut job = MockPrintJob::new();
            job.expect_write()
                .withf(|data| data == b"hello")
                .times(1)
                .returning(|_| Ok(()));
            Some(Arc::new(job) as Arc<dyn PrintJob>)
        });
        let ctx = ctx_with(printer);
        // Trailing bytes beyond `length` are not part of the job.
        let (mut request, _rx) = irp(MajorFunction::Write, 1, write_input(5, b"hello, world"));

        // Act
        handle(&ctx, &mut request).unwrap();

        // Assert
        assert_eq!(&request.output[..], &[5, 0, 0, 0, 0]);
        assert!(request.io_status.is_success());
    }

    #[test]
    fn test_write_shorter_than_length_is_invalid_data_and_never_writes() {
        // Arrange – no expectations: any call into the printer panics
        let ctx = ctx_with(MockPrinter::new());
        let (mut request, _rx) = irp(MajorFunction::Write, 1, write_input(100, &[0xAB; 50]));

        // Act
        let err = handle(&ctx, &mut request).unwrap_err();

        // Assert
        assert_eq!(err.status_code(), ChannelStatus::ERROR_INVALID_DATA);
        assert!(request.output.is_empty());
    }

    #[test]
    fn test_write_without_header_is_invalid_data() {
        let ctx = ctx_with(MockPrinter::new());
        let (mut request, _rx) = irp(MajorFunction::Write, 1, vec![0; 31]);

        assert!(matches!(
            handle(&ctx, &mut request),
            Err(IrpError::Protocol(ProtocolError::InsufficientData { needed: 32, .. }))
        ));
    }

    #[test]
    fn test_write_to_unknown_job_reports_zero_length() {
        let mut printer = MockPrinter::new();
        printer.expect_find_print_job().returning(|_| None);
        let ctx = ctx_with(printer);
        let (mut request, _rx) = irp(MajorFunction::Write, 7, write_input(3, b"abc"));

        handle(&ctx, &mut request).unwrap();

        assert_eq!(&request.output[..], &[0, 0, 0, 0, 0]);
        assert_eq!(request.io_status, NtStatus::UNSUCCESSFUL);
    }

    #[test]
    fn test_job_write_failure_is_fatal_error() {
        let mut printer = MockPrinter::new();
        printer.expect_find_print_job().returning(|_| {
            let mut job = MockPrintJob::new();
            job.expect_write()
                .returning(|_| Err(BackendError::Simulated("disk full")));
            Some(Arc::new(job) as Arc<dyn PrintJob>)
        });
        let ctx = ctx_with(printer);
        let (mut request, _rx) = irp(MajorFunction::Write, 3, write_input(1, b"x"));

        let err = handle(&ctx, &mut request).unwrap_err();

        assert!(matches!(err, IrpError::JobWrite { job_id: 3, .. }));
        assert_eq!(err.status_code(), ChannelStatus::ERROR_INTERNAL_ERROR);
    }

    // ── device control / unsupported ──────────────────────────────────────────

    #[test]
    fn test_device_control_returns_zero_length() {
        let ctx = ctx_with(MockPrinter::new());
        let (mut request, _rx) = irp(MajorFunction::DeviceControl, 0, vec![1, 2, 3]);

        handle(&ctx, &mut request).unwrap();

        assert_eq!(&request.output[..], &[0, 0, 0, 0]);
        assert!(request.io_status.is_success());
    }

    #[test]
    fn test_unsupported_major_function_is_not_supported() {
        let ctx = ctx_with(MockPrinter::new());
        let (mut request, _rx) = irp(MajorFunction::from(0x03), 0, vec![]);

        handle(&ctx, &mut request).unwrap();

        assert_eq!(request.io_status, NtStatus::NOT_SUPPORTED);
        assert!(request.output.is_empty());
    }
}
