//! In-memory printer backend.
//!
//! Keeps every job's bytes in memory.  Finished jobs are collected on the
//! printer so that tests and `--dry-run` style invocations can inspect what
//! would have been printed.  Failures can be injected per printer to
//! exercise the error paths of the device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{
    BackendError, JobTable, PrintJob, Printer, PrinterDriver, PrinterSpec, DEFAULT_DRIVER_NAME,
};

/// A job that was closed on a [`MemoryPrinter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Backend that prints into memory.
pub struct MemoryBackend {
    printers: Vec<PrinterSpec>,
    created: Mutex<HashMap<String, Arc<MemoryPrinter>>>,
    next_id: AtomicU32,
}

impl MemoryBackend {
    pub fn new(printers: Vec<PrinterSpec>) -> Self {
        Self {
            printers,
            created: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Returns the printer most recently handed out under `name`.
    pub fn printer(&self, name: &str) -> Option<Arc<MemoryPrinter>> {
        self.created.lock().get(name).cloned()
    }

    fn make_printer(&self, name: &str, driver: &str, is_default: bool) -> Arc<MemoryPrinter> {
        let printer = Arc::new(MemoryPrinter {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            driver: driver.to_string(),
            is_default,
            jobs: Arc::new(JobTable::default()),
            completed: Arc::new(Mutex::new(Vec::new())),
            released: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_write: Arc::new(AtomicBool::new(false)),
        });
        self.created
            .lock()
            .insert(name.to_string(), Arc::clone(&printer));
        printer
    }
}

impl PrinterDriver for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_printer(
        &self,
        name: &str,
        driver: Option<&str>,
        is_default: bool,
    ) -> Result<Arc<dyn Printer>, BackendError> {
        let driver = driver.filter(|d| !d.is_empty()).unwrap_or(DEFAULT_DRIVER_NAME);
        let printer: Arc<dyn Printer> = self.make_printer(name, driver, is_default);
        Ok(printer)
    }

    fn enum_printers(&self) -> Result<Vec<Arc<dyn Printer>>, BackendError> {
        Ok(self
            .printers
            .iter()
            .map(|p| {
                let printer: Arc<dyn Printer> =
                    self.make_printer(&p.name, &p.driver, p.is_default);
                printer
            })
            .collect())
    }
}

// ── Printer ───────────────────────────────────────────────────────────────────

/// A printer whose jobs end up in [`MemoryPrinter::completed_jobs`].
pub struct MemoryPrinter {
    id: u32,
    name: String,
    driver: String,
    is_default: bool,
    jobs: Arc<JobTable>,
    completed: Arc<Mutex<Vec<CompletedJob>>>,
    released: AtomicBool,
    fail_create: AtomicBool,
    fail_write: Arc<AtomicBool>,
}

impl MemoryPrinter {
    /// Jobs closed so far, in close order.
    pub fn completed_jobs(&self) -> Vec<CompletedJob> {
        self.completed.lock().clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Makes every following `create_print_job` fail.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Release);
    }

    /// Makes every following job write fail, including on open jobs.
    pub fn fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::Release);
    }
}

impl Printer for MemoryPrinter {
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
        if self.fail_create.load(Ordering::Acquire) {
            return Err(BackendError::Simulated("create_print_job"));
        }
        let job: Arc<dyn PrintJob> = Arc::new(MemoryJob {
            id,
            data: Mutex::new(Some(Vec::new())),
            table: Arc::downgrade(&self.jobs),
            completed: Arc::clone(&self.completed),
            fail_write: Arc::clone(&self.fail_write),
        });
        self.jobs.insert(Arc::clone(&job))?;
        debug!(printer = %self.name, job_id = id, "memory print job created");
        Ok(job)
    }

    fn find_print_job(&self, id: u32) -> Option<Arc<dyn PrintJob>> {
        self.jobs.get(id)
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.jobs.discard_all();
        }
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

struct MemoryJob {
    id: u32,
    data: Mutex<Option<Vec<u8>>>,
    table: Weak<JobTable>,
    completed: Arc<Mutex<Vec<CompletedJob>>>,
    fail_write: Arc<AtomicBool>,
}

impl MemoryJob {
    fn forget(&self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self.id);
        }
    }
}

impl PrintJob for MemoryJob {
    fn id(&self) -> u32 {
        self.id
    }

    fn write(&self, data: &[u8]) -> Result<(), BackendError> {
        if self.fail_write.load(Ordering::Acquire) {
            return Err(BackendError::Simulated("write"));
        }
        let mut guard = self.data.lock();
        let buf = guard.as_mut().ok_or(BackendError::JobClosed(self.id))?;
        buf.extend_from_slice(data);
        Ok(())
    }

    fn close(&self) -> Result<(), BackendError> {
        let data = self.data.lock().take().ok_or(BackendError::JobClosed(self.id))?;
        self.forget();
        self.completed.lock().push(CompletedJob { id: self.id, data });
        Ok(())
    }

    fn discard(&self) {
        if self.data.lock().take().is_some() {
            self.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office() -> Vec<PrinterSpec> {
        vec![PrinterSpec {
            name: "Office".to_string(),
            driver: "GenericPCL".to_string(),
            is_default: true,
        }]
    }

    #[test]
    fn test_closed_jobs_are_collected_in_order() {
        // Arrange
        let backend = MemoryBackend::new(office());
        let printer = backend.get_printer("Office", Some("GenericPCL"), true).unwrap();

        // Act
        for id in [1u32, 2] {
            let job = printer.create_print_job(id).unwrap();
            job.write(format!("job {id}").as_bytes()).unwrap();
            job.close().unwrap();
        }

        // Assert
        let printed = backend.printer("Office").unwrap().completed_jobs();
        assert_eq!(
            printed,
            vec![
                CompletedJob { id: 1, data: b"job 1".to_vec() },
                CompletedJob { id: 2, data: b"job 2".to_vec() },
            ]
        );
    }

    #[test]
    fn test_close_twice_fails() {
        let backend = MemoryBackend::new(office());
        let printer = backend.get_printer("Office", None, false).unwrap();
        let job = printer.create_print_job(1).unwrap();

        job.close().unwrap();

        assert!(matches!(job.close(), Err(BackendError::JobClosed(1))));
    }

    #[test]
    fn test_injected_failures() {
        let backend = MemoryBackend::new(office());
        let printer = backend.get_printer("Office", None, false).unwrap();
        let handle = backend.printer("Office").unwrap();
        let job = printer.create_print_job(1).unwrap();

        handle.fail_write(true);
        handle.fail_create(true);

        assert!(job.write(b"x").is_err());
        assert!(printer.create_print_job(2).is_err());
    }

    #[test]
    fn test_release_discards_open_jobs() {
        let backend = MemoryBackend::new(office());
        let printer = backend.get_printer("Office", None, false).unwrap();
        printer.create_print_job(1).unwrap();

        printer.release();

        let handle = backend.printer("Office").unwrap();
        assert!(handle.is_released());
        assert!(printer.find_print_job(1).is_none());
        assert!(handle.completed_jobs().is_empty());
    }

    #[test]
    fn test_enum_printers_uses_configured_specs() {
        let backend = MemoryBackend::new(office());

        let printers = backend.enum_printers().unwrap();

        assert_eq!(printers.len(), 1);
        assert_eq!(printers[0].driver(), "GenericPCL");
        assert!(printers[0].is_default());
    }
}
