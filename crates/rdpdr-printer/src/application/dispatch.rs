//! Dispatch core: hands request records from the transport to a printer.
//!
//! # Two modes (for beginners)
//!
//! - **Synchronous** – [`PrinterDevice::submit`] runs the handler on the
//!   caller's thread and returns once the record is completed.  Simple, but
//!   a slow printer backend stalls the transport.
//!
//! - **Asynchronous** – `submit` pushes the record onto a lock-free queue and
//!   returns immediately.  A dedicated worker thread drains the queue.
//!
//! # Worker loop
//!
//! ```text
//!            ┌──────────── wait (no timeout) ◄────────────┐
//!            ▼                                            │
//!   stop set? ── yes ──► exit                             │
//!            │ no                                         │
//!   reset wake, pop one record, process it                │
//!            │                                            │
//!   queue still non-empty? ── yes ──► set wake ───────────┤
//!            └────────────── no ──────────────────────────┘
//! ```
//!
//! Every push sets the wake flag, so a record is never left unnoticed; a
//! wake that finds the queue already empty is harmless.  Stop is checked
//! before wake, so a stop request ends the loop even with records queued.
//! Those records are discarded by [`PrinterDevice::shutdown`].
//!
//! # Failure
//!
//! A handler error discards the record, marks the device faulted, ends the
//! worker and is reported once to the session's [`ChannelErrorSink`].
//! Nothing restarts the worker; later submissions are discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use bytes::BytesMut;
use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use rdpdr_core::{AnnouncePayload, ChannelStatus, Irp, ProtocolError};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::application::irp_handlers::{self, IrpError, PrinterContext};
use crate::infrastructure::backend::Printer;

/// Error type for the dispatch core.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The device stopped after an earlier fatal error.
    #[error("device {0} is faulted")]
    Faulted(String),

    /// The device has been shut down.
    #[error("device {0} is shut down")]
    ShutDown(String),

    /// No device is registered under this id.
    #[error("no device with id {0}")]
    UnknownDevice(u32),

    /// Processing the record failed.
    #[error(transparent)]
    Irp(#[from] IrpError),

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread for {label}: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

impl DispatchError {
    pub fn status_code(&self) -> ChannelStatus {
        match self {
            DispatchError::Irp(e) => e.status_code(),
            DispatchError::UnknownDevice(_) => ChannelStatus::ERROR_INVALID_PARAMETER,
            DispatchError::Spawn { .. } => ChannelStatus::INITIALIZATION_ERROR,
            DispatchError::Faulted(_) | DispatchError::ShutDown(_) => {
                ChannelStatus::ERROR_INTERNAL_ERROR
            }
        }
    }
}

/// Receives fatal device errors on behalf of the session.
#[cfg_attr(test, mockall::automock)]
pub trait ChannelErrorSink: Send + Sync {
    fn report(&self, device_id: u32, status: ChannelStatus, message: &str);
}

/// A [`ChannelErrorSink`] that only logs.
#[derive(Debug, Default)]
pub struct LoggingErrorSink;

impl ChannelErrorSink for LoggingErrorSink {
    fn report(&self, device_id: u32, status: ChannelStatus, message: &str) {
        error!(device_id, status = %status, "channel error: {message}");
    }
}

/// Where requests are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Synchronous,
    Asynchronous,
}

/// Counters for observing a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records completed.
    pub completed: u64,
    /// Times the worker woke up.
    pub wakeups: u64,
}

// ── Signals ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Flags {
    wake: bool,
    stop: bool,
}

/// Manual-reset wake and stop signals sharing one condition variable.
#[derive(Default)]
struct Signals {
    flags: Mutex<Flags>,
    condvar: Condvar,
}

impl Signals {
    fn set_wake(&self) {
        self.flags.lock().wake = true;
        self.condvar.notify_one();
    }

    fn set_stop(&self) {
        self.flags.lock().stop = true;
        self.condvar.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.flags.lock().stop
    }

    /// Blocks until wake or stop is set.  Returns `false` on stop; on wake,
    /// resets the wake flag and returns `true`.
    fn wait(&self) -> bool {
        let mut flags = self.flags.lock();
        while !flags.wake && !flags.stop {
            self.condvar.wait(&mut flags);
        }
        if flags.stop {
            return false;
        }
        flags.wake = false;
        true
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

/// State shared between the device handle and its worker thread.
struct Shared {
    label: String,
    device_id: OnceLock<u32>,
    context: PrinterContext,
    queue: SegQueue<Irp>,
    signals: Signals,
    faulted: AtomicBool,
    error_sink: Arc<dyn ChannelErrorSink>,
    completed: AtomicU64,
    wakeups: AtomicU64,
}

impl Shared {
    fn device_id(&self) -> u32 {
        self.device_id.get().copied().unwrap_or_default()
    }

    /// Runs the handler; completes the record on success, discards it on error.
    fn process(&self, mut irp: Irp) -> Result<(), IrpError> {
        trace!(device = %self.label, ?irp, "processing request");
        match irp_handlers::handle(&self.context, &mut irp) {
            Ok(()) => {
                irp.complete();
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                irp.discard();
                Err(e)
            }
        }
    }

    fn fault(&self, err: &IrpError) {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            error!(device = %self.label, "device faulted: {err}");
            self.error_sink
                .report(self.device_id(), err.status_code(), &err.to_string());
        }
    }

    fn run(&self) {
        debug!(device = %self.label, "worker started");
        while self.signals.wait() {
            self.wakeups.fetch_add(1, Ordering::Relaxed);
            let Some(irp) = self.queue.pop() else {
                continue;
            };
            if let Err(e) = self.process(irp) {
                self.fault(&e);
                break;
            }
            if !self.queue.is_empty() {
                self.signals.set_wake();
            }
        }
        debug!(device = %self.label, "worker exiting");
    }
}

/// Everything needed to build a [`PrinterDevice`].
pub struct DeviceConfig {
    pub mode: DeviceMode,
    pub printer: Arc<dyn Printer>,
    pub announce: AnnouncePayload,
    pub error_sink: Arc<dyn ChannelErrorSink>,
}

/// A redirected printer: queue, worker and job provider of one device.
pub struct PrinterDevice {
    mode: DeviceMode,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    announce: BytesMut,
    shut_down: AtomicBool,
}

impl PrinterDevice {
    /// Creates a device named `PRN<printer id>`.  No thread is started yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FieldTooLong`] if the announce payload cannot
    /// be encoded.
    pub fn new(config: DeviceConfig) -> Result<Self, ProtocolError> {
        let label = format!("PRN{}", config.printer.id());
        let mut announce = BytesMut::new();
        config.announce.encode_into(&mut announce)?;
        Ok(Self {
            mode: config.mode,
            shared: Arc::new(Shared {
                label,
                device_id: OnceLock::new(),
                context: PrinterContext::new(config.printer),
                queue: SegQueue::new(),
                signals: Signals::default(),
                faulted: AtomicBool::new(false),
                error_sink: config.error_sink,
                completed: AtomicU64::new(0),
                wakeups: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
            announce,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Encoded announce payload.
    pub fn announce_data(&self) -> &[u8] {
        &self.announce
    }

    pub fn printer(&self) -> &Arc<dyn Printer> {
        self.shared.context.printer()
    }

    /// Id assigned by the device registry, if registered.
    pub fn device_id(&self) -> Option<u32> {
        self.shared.device_id.get().copied()
    }

    /// Records the id assigned by the device registry.  Later calls are ignored.
    pub fn assign_device_id(&self, id: u32) {
        if self.shared.device_id.set(id).is_err() {
            warn!(device = %self.label(), "device id already assigned");
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.shared.faulted.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            completed: self.shared.completed.load(Ordering::Relaxed),
            wakeups: self.shared.wakeups.load(Ordering::Relaxed),
        }
    }

    /// Number of records waiting for the worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Starts the worker thread.  Does nothing in synchronous mode or if the
    /// worker is already running.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Spawn`] if the thread cannot be created.
    pub fn start(&self) -> Result<(), DispatchError> {
        if self.mode == DeviceMode::Synchronous {
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("{}-worker", self.label()))
            .spawn(move || shared.run())
            .map_err(|source| DispatchError::Spawn {
                label: self.label().to_string(),
                source,
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Hands a record to the device.
    ///
    /// In synchronous mode the record is processed before this returns.  In
    /// asynchronous mode it is queued for the worker.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Faulted`] or [`DispatchError::ShutDown`] (the
    /// record is discarded), or in synchronous mode the handler's error.
    pub fn submit(&self, irp: Irp) -> Result<(), DispatchError> {
        if self.is_faulted() {
            irp.discard();
            return Err(DispatchError::Faulted(self.label().to_string()));
        }
        if self.shut_down.load(Ordering::Acquire) || self.shared.signals.is_stopped() {
            irp.discard();
            return Err(DispatchError::ShutDown(self.label().to_string()));
        }

        match self.mode {
            DeviceMode::Synchronous => self.shared.process(irp).map_err(DispatchError::from),
            DeviceMode::Asynchronous => {
                self.shared.queue.push(irp);
                self.shared.signals.set_wake();
                Ok(())
            }
        }
    }

    /// Stops the device: signal stop, join the worker, discard queued
    /// records and release the printer.  Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.signals.set_stop();

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(device = %self.label(), "worker thread panicked");
            }
        }

        let mut discarded = 0usize;
        while let Some(irp) = self.shared.queue.pop() {
            irp.discard();
            discarded += 1;
        }
        if discarded > 0 {
            debug!(device = %self.label(), discarded, "discarded queued requests");
        }

        self.printer().release();
        info!(device = %self.label(), "device shut down");
    }
}

impl Drop for PrinterDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PrinterDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterDevice")
            .field("label", &self.label())
            .field("device_id", &self.device_id())
            .field("mode", &self.mode)
            .field("faulted", &self.is_faulted())
            .finish()
    }
}
