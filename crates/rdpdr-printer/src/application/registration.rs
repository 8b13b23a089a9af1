//! Printer registration and device lifecycle.
//!
//! Registration turns local printers into redirected devices:
//!
//! ```text
//! driver "GenericPCL:file" ─► backend "file" ─► get_printer / enum_printers
//!                                                     │ (per printer)
//!                           cache.load ─► announce payload (defaults on miss)
//!                                                     │
//!                               PrinterDevice ─► DeviceRegistry ─► start worker
//! ```
//!
//! A single named printer also gets its driver name written to the cache
//! first, so that the next session announces the same driver.  When every
//! printer of a backend is enumerated, registration stops at the first
//! printer that fails.
//!
//! Teardown is [`PrinterDevice::shutdown`]: stop, join, discard queued
//! records, release the printer.

use std::sync::Arc;

use rdpdr_core::protocol::messages::announce_flags;
use rdpdr_core::{AnnouncePayload, ChannelStatus, EncodedName, ProtocolError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::dispatch::{
    ChannelErrorSink, DeviceConfig, DeviceMode, DispatchError, PrinterDevice,
};
use crate::infrastructure::backend::{BackendError, BackendRegistry, Printer, PrinterDriver};
use crate::infrastructure::storage::cache::{CacheError, ConfigCacheStore};
use crate::infrastructure::storage::config::AppConfig;

/// Error type for printer registration.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to save default printer config: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("failed to encode announce payload: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("device registry rejected {label}: {reason}")]
    Rejected { label: String, reason: String },
}

impl RegistrationError {
    pub fn status_code(&self) -> ChannelStatus {
        match self {
            RegistrationError::Backend(e) => e.status_code(),
            RegistrationError::Cache(e) => e.status_code(),
            RegistrationError::Dispatch(e) => e.status_code(),
            RegistrationError::Protocol(e) => e.status_code(),
            RegistrationError::Rejected { .. } => ChannelStatus::INITIALIZATION_ERROR,
        }
    }
}

/// Accepts new devices and assigns their ids.
pub trait DeviceRegistry: Send + Sync {
    fn register_device(&self, device: Arc<PrinterDevice>) -> Result<u32, RegistrationError>;
}

/// Which printers to register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrinterRequest {
    /// A single printer; `None` registers every printer of the backend.
    pub name: Option<String>,
    /// Driver identifier, optionally suffixed with `:backend`.
    pub driver: Option<String>,
    pub is_default: bool,
}

impl PrinterRequest {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.printer.name.clone(),
            driver: Some(config.printer.driver.clone()).filter(|d| !d.is_empty()),
            is_default: config.printer.is_default,
        }
    }
}

/// Splits `"driver:backend"` into its parts.  Empty parts become `None`.
pub fn parse_driver_identifier(identifier: &str) -> (Option<&str>, Option<&str>) {
    let (driver, backend) = match identifier.split_once(':') {
        Some((driver, backend)) => (driver, Some(backend)),
        None => (identifier, None),
    };
    (
        Some(driver).filter(|d| !d.is_empty()),
        backend.filter(|b| !b.is_empty()),
    )
}

/// Builds the announce payload of `printer` from the cache.
///
/// A missing cache entry is a soft miss: the payload carries the printer's
/// live name and driver and empty PnP name and blob.
pub fn announce_payload(cache: &ConfigCacheStore, printer: &dyn Printer) -> AnnouncePayload {
    let name = EncodedName::from_name(printer.name());
    let driver = EncodedName::from_name(printer.driver());
    match cache.load(&name, driver.as_bytes(), printer.is_default()) {
        Ok(payload) => payload,
        Err(e) => {
            if e.is_not_found() {
                debug!(printer = printer.name(), "no cached config, announcing defaults");
            } else {
                warn!(printer = printer.name(), "failed to load cached config: {e}");
            }
            AnnouncePayload {
                flags: if printer.is_default() {
                    announce_flags::DEFAULT_PRINTER
                } else {
                    0
                },
                code_page: 0,
                pnp_name: Vec::new(),
                driver_name: driver.as_bytes().to_vec(),
                printer_name: name.with_separators_replaced(),
                cached_fields: Vec::new(),
            }
        }
    }
}

/// Registers printers as devices.
pub struct Registrar<'a> {
    backends: &'a BackendRegistry,
    cache: &'a ConfigCacheStore,
    registry: &'a dyn DeviceRegistry,
    error_sink: Arc<dyn ChannelErrorSink>,
    mode: DeviceMode,
}

impl<'a> Registrar<'a> {
    /// `synchronous` is the session-wide channel mode.
    pub fn new(
        backends: &'a BackendRegistry,
        cache: &'a ConfigCacheStore,
        registry: &'a dyn DeviceRegistry,
        error_sink: Arc<dyn ChannelErrorSink>,
        synchronous: bool,
    ) -> Self {
        Self {
            backends,
            cache,
            registry,
            error_sink,
            mode: if synchronous {
                DeviceMode::Synchronous
            } else {
                DeviceMode::Asynchronous
            },
        }
    }

    /// Picks the backend named by the driver identifier's suffix, or the
    /// default backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownBackend`] if the backend is not registered.
    pub fn resolve_backend(
        &self,
        request: &PrinterRequest,
    ) -> Result<(Arc<dyn PrinterDriver>, Option<String>), RegistrationError> {
        let (driver, backend) = request
            .driver
            .as_deref()
            .map_or((None, None), parse_driver_identifier);
        let backend = match backend {
            Some(name) => self.backends.get(name)?,
            None => self.backends.default_backend()?,
        };
        Ok((backend, driver.map(str::to_string)))
    }

    /// Registers the printers described by `request`.
    ///
    /// # Errors
    ///
    /// Returns the first failure.  When enumerating, devices registered
    /// before the failure stay registered.
    pub fn register(
        &self,
        request: &PrinterRequest,
    ) -> Result<Vec<Arc<PrinterDevice>>, RegistrationError> {
        let (backend, driver) = self.resolve_backend(request)?;
        debug!(backend = backend.name(), "resolved printer backend");

        match &request.name {
            Some(name) => {
                let printer = backend.get_printer(name, driver.as_deref(), request.is_default)?;
                self.save_default_config(printer.as_ref())?;
                Ok(vec![self.register_printer(printer)?])
            }
            None => {
                let printers = backend.enum_printers()?;
                let mut devices = Vec::with_capacity(printers.len());
                for printer in printers {
                    devices.push(self.register_printer(printer)?);
                }
                Ok(devices)
            }
        }
    }

    /// Writes the printer's driver name to its cache entry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Cache`] if the write fails.
    pub fn save_default_config(&self, printer: &dyn Printer) -> Result<(), RegistrationError> {
        let name = EncodedName::from_name(printer.name());
        let driver = if printer.driver().is_empty() {
            Vec::new()
        } else {
            EncodedName::from_name(printer.driver()).as_bytes().to_vec()
        };
        self.cache.save_default_driver(&name, &driver)?;
        Ok(())
    }

    /// Creates, registers and starts the device of one printer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if the registry rejects the device or
    /// its worker cannot start.  The printer is released in that case.
    pub fn register_printer(
        &self,
        printer: Arc<dyn Printer>,
    ) -> Result<Arc<PrinterDevice>, RegistrationError> {
        let announce = announce_payload(self.cache, printer.as_ref());
        let device = Arc::new(PrinterDevice::new(DeviceConfig {
            mode: self.mode,
            printer,
            announce,
            error_sink: Arc::clone(&self.error_sink),
        })?);

        let id = self.registry.register_device(Arc::clone(&device))?;
        device.assign_device_id(id);
        if let Err(e) = device.start() {
            device.shutdown();
            return Err(e.into());
        }

        info!(
            device_id = id,
            label = device.label(),
            printer = device.printer().name(),
            mode = ?device.mode(),
            "printer registered"
        );
        Ok(device)
    }
}
