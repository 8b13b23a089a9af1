//! Spool-directory printer backend.
//!
//! Every job becomes one file:
//!
//! ```text
//! <spool_dir>/<printer name>/<job id>-<uuid>.prn
//! ```
//!
//! Closing a job flushes the file to disk and keeps it; discarding a job
//! deletes it.  Path separators in printer names are replaced with `_` when
//! building the directory name.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendError, JobTable, PrintJob, Printer, PrinterDriver, PrinterSpec, DEFAULT_DRIVER_NAME,
};

/// Backend that writes jobs to files below a spool directory.
pub struct FileBackend {
    spool_dir: PathBuf,
    printers: Vec<PrinterSpec>,
    next_id: AtomicU32,
}

impl FileBackend {
    pub fn new(spool_dir: impl Into<PathBuf>, printers: Vec<PrinterSpec>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            printers,
            next_id: AtomicU32::new(0),
        }
    }

    fn make_printer(&self, name: &str, driver: &str, is_default: bool) -> Arc<dyn Printer> {
        let dir = self.spool_dir.join(sanitize(name));
        Arc::new(FilePrinter {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            driver: driver.to_string(),
            is_default,
            dir,
            jobs: Arc::new(JobTable::default()),
            released: AtomicBool::new(false),
        })
    }
}

impl PrinterDriver for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn get_printer(
        &self,
        name: &str,
        driver: Option<&str>,
        is_default: bool,
    ) -> Result<Arc<dyn Printer>, BackendError> {
        // Any name is accepted: the spool directory is created on first job.
        let known = self.printers.iter().find(|p| p.name == name);
        let driver = driver
            .filter(|d| !d.is_empty())
            .or_else(|| known.map(|p| p.driver.as_str()).filter(|d| !d.is_empty()))
            .unwrap_or(DEFAULT_DRIVER_NAME);
        Ok(self.make_printer(name, driver, is_default))
    }

    fn enum_printers(&self) -> Result<Vec<Arc<dyn Printer>>, BackendError> {
        Ok(self
            .printers
            .iter()
            .map(|p| {
                let driver = if p.driver.is_empty() {
                    DEFAULT_DRIVER_NAME
                } else {
                    p.driver.as_str()
                };
                self.make_printer(&p.name, driver, p.is_default)
            })
            .collect())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

// ── Printer ───────────────────────────────────────────────────────────────────

struct FilePrinter {
    id: u32,
    name: String,
    driver: String,
    is_default: bool,
    dir: PathBuf,
    jobs: Arc<JobTable>,
    released: AtomicBool,
}

impl Printer for FilePrinter {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> &str {
        &self.driver
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn create_print_job(&self, id: u32) -> Result<Arc<dyn PrintJob>, BackendError> {
        if self.released.load(Ordering::Acquire) {
            return Err(BackendError::Released(self.name.clone()));
        }
        if self.jobs.get(id).is_some() {
            return Err(BackendError::JobExists(id));
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| BackendError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!("{id}-{}.prn", Uuid::new_v4()));
        let file = File::create(&path).map_err(|source| BackendError::Io {
            path: path.clone(),
            source,
        })?;

        let job: Arc<dyn PrintJob> = Arc::new(FileJob {
            id,
            path,
            file: Mutex::new(Some(file)),
            table: Arc::downgrade(&self.jobs),
        });
        self.jobs.insert(Arc::clone(&job))?;
        debug!(printer = %self.name, job_id = id, "print job created");
        Ok(job)
    }

    fn find_print_job(&self, id: u32) -> Option<Arc<dyn PrintJob>> {
        self.jobs.get(id)
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.jobs.discard_all();
            debug!(printer = %self.name, "printer released");
        }
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

struct FileJob {
    id: u32,
    path: PathBuf,
    /// `None` once the job is closed or discarded.
    file: Mutex<Option<File>>,
    table: Weak<JobTable>,
}

impl FileJob {
    fn forget(&self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self.id);
        }
    }

    fn io_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl PrintJob for FileJob {
    fn id(&self) -> u32 {
        self.id
    }

    fn write(&self, data: &[u8]) -> Result<(), BackendError> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(BackendError::JobClosed(self.id))?;
        file.write_all(data).map_err(|e| self.io_error(e))
    }

    fn close(&self) -> Result<(), BackendError> {
        let file = self.file.lock().take().ok_or(BackendError::JobClosed(self.id))?;
        self.forget();
        file.sync_all().map_err(|e| self.io_error(e))?;
        info!(job_id = self.id, path = %self.path().display(), "print job spooled");
        Ok(())
    }

    fn discard(&self) {
        let Some(file) = self.file.lock().take() else {
            return;
        };
        drop(file);
        self.forget();
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(job_id = self.id, "failed to remove discarded spool file: {e}");
        }
    }
}
