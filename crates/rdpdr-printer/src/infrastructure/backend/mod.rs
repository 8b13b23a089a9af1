//! Printer backends: the job providers that sit behind a printer device.
//!
//! # What is a backend? (for beginners)
//!
//! The device channel only moves bytes.  Someone on the client still has to
//! take those bytes and turn them into a print job – hand them to CUPS, to
//! the Windows spooler, or, in our case, write them to a spool directory.
//! That "someone" is a backend.
//!
//! The application layer never talks to a concrete backend.  It depends on
//! three traits:
//!
//! - [`PrinterDriver`] – one per backend; looks up a printer by name or
//!   enumerates every printer it knows.
//! - [`Printer`] – one local printer; creates and finds print jobs.
//! - [`PrintJob`] – one open job; receives bytes until it is closed or
//!   discarded.
//!
//! Backends are looked up by name in a [`BackendRegistry`].  Two are built in:
//!
//! | Name     | Behaviour                                                   |
//! |----------|-------------------------------------------------------------|
//! | `file`   | Spools every job to `<spool_dir>/<printer>/<id>-<uuid>.prn` |
//! | `memory` | Keeps job bytes in memory; used by tests and dry runs       |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rdpdr_core::ChannelStatus;
use thiserror::Error;
use tracing::debug;

pub mod file;
pub mod memory;

/// Driver name reported when neither the caller nor the config names one.
pub const DEFAULT_DRIVER_NAME: &str = "MS Publisher Imagesetter";

/// Error type for backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No backend is registered under this name.
    #[error("unknown printer backend: {0}")]
    UnknownBackend(String),

    /// The backend does not know a printer with this name.
    #[error("printer not found: {0}")]
    PrinterNotFound(String),

    /// A job with this id is already open on the printer.
    #[error("print job {0} is already open")]
    JobExists(u32),

    /// The job was closed or discarded and accepts no more data.
    #[error("print job {0} is closed")]
    JobClosed(u32),

    /// The printer was released and hands out no more jobs.
    #[error("printer {0} has been released")]
    Released(String),

    /// A file system error while spooling.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure injected by the memory backend.
    #[error("simulated backend failure: {0}")]
    Simulated(&'static str),
}

impl BackendError {
    /// Channel status reported when this error aborts a device.
    pub fn status_code(&self) -> ChannelStatus {
        match self {
            BackendError::UnknownBackend(_) | BackendError::PrinterNotFound(_) => {
                ChannelStatus::INITIALIZATION_ERROR
            }
            _ => ChannelStatus::ERROR_INTERNAL_ERROR,
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// One open print job.
#[cfg_attr(test, mockall::automock)]
pub trait PrintJob: Send + Sync {
    /// Job id, as handed to [`Printer::create_print_job`].
    fn id(&self) -> u32;

    /// Appends `data` to the job.
    fn write(&self, data: &[u8]) -> Result<(), BackendError>;

    /// Finishes the job and hands it to the printer.
    fn close(&self) -> Result<(), BackendError>;

    /// Abandons the job; nothing is printed.
    fn discard(&self);
}

/// One local printer exposed by a backend.
#[cfg_attr(test, mockall::automock)]
pub trait Printer: Send + Sync {
    /// Backend-local printer index.
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    fn driver(&self) -> &str;

    fn is_default(&self) -> bool;

    /// Opens a new job identified by `id`.
    fn create_print_job(&self, id: u32) -> Result<Arc<dyn PrintJob>, BackendError>;

    /// Looks up an open job.
    fn find_print_job(&self, id: u32) -> Option<Arc<dyn PrintJob>>;

    /// Drops the device's hold on the printer.  Jobs still open are discarded.
    fn release(&self);
}

/// A printer backend.
pub trait PrinterDriver: Send + Sync {
    /// Name the backend is registered under.
    fn name(&self) -> &str;

    /// Returns the printer called `name`.
    ///
    /// `driver` overrides the driver name reported for the printer.
    fn get_printer(
        &self,
        name: &str,
        driver: Option<&str>,
        is_default: bool,
    ) -> Result<Arc<dyn Printer>, BackendError>;

    /// Returns every printer the backend knows about.
    fn enum_printers(&self) -> Result<Vec<Arc<dyn Printer>>, BackendError>;
}

/// A printer known to a backend before any device asks for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterSpec {
    pub name: String,
    pub driver: String,
    pub is_default: bool,
}

// ── Open-job table ────────────────────────────────────────────────────────────

/// Open jobs of one printer, keyed by job id.
///
/// Jobs keep a weak handle to the table so that closing a job removes it.
#[derive(Default)]
pub(crate) struct JobTable {
    jobs: Mutex<HashMap<u32, Arc<dyn PrintJob>>>,
}

impl JobTable {
    pub(crate) fn insert(&self, job: Arc<dyn PrintJob>) -> Result<(), BackendError> {
        let mut jobs = self.jobs.lock();
        let id = job.id();
        if jobs.contains_key(&id) {
            return Err(BackendError::JobExists(id));
        }
        jobs.insert(id, job);
        Ok(())
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<dyn PrintJob>> {
        self.jobs.lock().get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: u32) {
        self.jobs.lock().remove(&id);
    }

    /// Discards every open job.
    pub(crate) fn discard_all(&self) {
        // Collect first: discard() removes the job from this table.
        let open: Vec<_> = self.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in open {
            debug!(job_id = job.id(), "discarding open print job");
            job.discard();
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Backends by name, plus the name of the default one.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn PrinterDriver>>,
    default_backend: String,
}

impl BackendRegistry {
    /// Creates an empty registry whose default is `default_backend`.
    pub fn new(default_backend: impl Into<String>) -> Self {
        Self {
            backends: HashMap::new(),
            default_backend: default_backend.into(),
        }
    }

    /// Creates a registry with the built-in `file` and `memory` backends.
    ///
    /// Both backends know the printers in `printers`; the file backend spools
    /// below `spool_dir`.
    pub fn with_builtin(
        default_backend: impl Into<String>,
        spool_dir: impl Into<PathBuf>,
        printers: Vec<PrinterSpec>,
    ) -> Self {
        let mut registry = Self::new(default_backend);
        registry.register(Arc::new(file::FileBackend::new(spool_dir, printers.clone())));
        registry.register(Arc::new(memory::MemoryBackend::new(printers)));
        registry
    }

    /// Adds (or replaces) a backend under its own name.
    pub fn register(&mut self, backend: Arc<dyn PrinterDriver>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Looks up a backend by name.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownBackend`] if nothing is registered
    /// under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn PrinterDriver>, BackendError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    /// Returns the default backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownBackend`] if the configured default is
    /// not registered.
    pub fn default_backend(&self) -> Result<Arc<dyn PrinterDriver>, BackendError> {
        self.get(&self.default_backend)
    }

    pub fn default_backend_name(&self) -> &str {
        &self.default_backend
    }
}
