//! In-process device registry.
//!
//! The `DeviceManager` plays the role of the session's device manager for
//! printers: it assigns device ids, routes request records and control
//! messages to the right device, and tears every device down at the end of
//! the session.
//!
//! Control messages for all printers go through one lock so that cache
//! writes for a printer name are serialized.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rdpdr_core::{ChannelStatus, Irp, PrinterMessage};
use thiserror::Error;
use tracing::{debug, info};

use crate::application::cache_events::{self, CacheEventError};
use crate::application::dispatch::{DispatchError, PrinterDevice};
use crate::application::registration::{DeviceRegistry, RegistrationError};
use crate::infrastructure::storage::cache::ConfigCacheStore;

/// Error type for control-message routing.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no device with id {0}")]
    UnknownDevice(u32),

    #[error(transparent)]
    Event(#[from] CacheEventError),
}

impl ControlError {
    pub fn status_code(&self) -> ChannelStatus {
        match self {
            ControlError::UnknownDevice(_) => ChannelStatus::ERROR_INVALID_PARAMETER,
            ControlError::Event(e) => e.status_code(),
        }
    }
}

/// Registry of the session's printer devices.
pub struct DeviceManager {
    devices: RwLock<BTreeMap<u32, Arc<PrinterDevice>>>,
    next_id: AtomicU32,
    cache: ConfigCacheStore,
    control_lock: Mutex<()>,
}

impl DeviceManager {
    pub fn new(cache: ConfigCacheStore) -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            cache,
            control_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &ConfigCacheStore {
        &self.cache
    }

    pub fn device(&self, id: u32) -> Option<Arc<PrinterDevice>> {
        self.devices.read().get(&id).cloned()
    }

    /// All devices, ordered by id.
    pub fn devices(&self) -> Vec<Arc<PrinterDevice>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Hands `irp` to the device named by `irp.device_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownDevice`] (the record is discarded) or
    /// whatever the device's `submit` returns.
    pub fn submit(&self, irp: Irp) -> Result<(), DispatchError> {
        match self.device(irp.device_id) {
            Some(device) => device.submit(irp),
            None => {
                let id = irp.device_id;
                irp.discard();
                Err(DispatchError::UnknownDevice(id))
            }
        }
    }

    /// Applies a printer control message received for `device_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownDevice`] or the message's
    /// [`CacheEventError`].
    pub fn handle_control(
        &self,
        device_id: u32,
        bytes: &[u8],
    ) -> Result<PrinterMessage, ControlError> {
        if self.device(device_id).is_none() {
            return Err(ControlError::UnknownDevice(device_id));
        }
        let _guard = self.control_lock.lock();
        let msg = cache_events::handle_printer_message(&self.cache, bytes)?;
        debug!(device_id, event = msg.event_id(), "control message applied");
        Ok(msg)
    }

    /// Shuts down and forgets every device.
    pub fn teardown_all(&self) {
        let devices = std::mem::take(&mut *self.devices.write());
        for (id, device) in devices {
            debug!(device_id = id, "tearing down device");
            device.shutdown();
        }
        info!("all printer devices torn down");
    }
}

impl DeviceRegistry for DeviceManager {
    fn register_device(&self, device: Arc<PrinterDevice>) -> Result<u32, RegistrationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.devices.write().insert(id, device);
        Ok(id)
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if !self.devices.get_mut().is_empty() {
            self.teardown_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::{DeviceConfig, DeviceMode, LoggingErrorSink};
    use crate::infrastructure::backend::memory::MemoryBackend;
    use crate::infrastructure::backend::PrinterDriver;
    use bytes::Bytes;
    use rdpdr_core::protocol::messages::DeletePrinterEvent;
    use rdpdr_core::{
        encode_printer_message, AnnouncePayload, ChannelResponder, EncodedName, IrpOutcome,
        MajorFunction,
    };
    use std::sync::mpsc;

    fn device(backend: &MemoryBackend, name: &str) -> Arc<PrinterDevice> {
        Arc::new(
            PrinterDevice::new(DeviceConfig {
                mode: DeviceMode::Synchronous,
                printer: backend.get_printer(name, None, false).unwrap(),
                announce: AnnouncePayload::default(),
                error_sink: Arc::new(LoggingErrorSink),
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DeviceManager::new(ConfigCacheStore::new(dir.path()));
        let backend = MemoryBackend::new(Vec::new());

        let first = manager.register_device(device(&backend, "A")).unwrap();
        let second = manager.register_device(device(&backend, "B")).unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_submit_routes_by_device_id() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let manager = DeviceManager::new(ConfigCacheStore::new(dir.path()));
        let backend = MemoryBackend::new(Vec::new());
        let id = manager.register_device(device(&backend, "A")).unwrap();
        let (tx, rx) = mpsc::channel();
        let irp = Irp::new(
            id,
            11,
            0,
            MajorFunction::DeviceControl,
            Bytes::new(),
            Box::new(ChannelResponder::new(tx.clone())),
        );
        let stray = Irp::new(
            99,
            12,
            0,
            MajorFunction::DeviceControl,
            Bytes::new(),
            Box::new(ChannelResponder::new(tx)),
        );

        // Act
        manager.submit(irp).unwrap();
        let stray_result = manager.submit(stray);

        // Assert
        assert!(matches!(rx.recv().unwrap(), IrpOutcome::Completed(r) if r.completion_id == 11));
        assert!(matches!(stray_result, Err(DispatchError::UnknownDevice(99))));
        assert_eq!(rx.recv().unwrap(), IrpOutcome::Discarded { completion_id: 12 });
    }

    #[test]
    fn test_control_for_unknown_device_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DeviceManager::new(ConfigCacheStore::new(dir.path()));
        let bytes = encode_printer_message(&PrinterMessage::DeletePrinter(DeletePrinterEvent {
            printer_name: EncodedName::from_name("Office"),
        }))
        .unwrap();

        let err = manager.handle_control(3, &bytes).unwrap_err();

        assert!(matches!(err, ControlError::UnknownDevice(3)));
    }

    #[test]
    fn test_teardown_all_releases_printers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DeviceManager::new(ConfigCacheStore::new(dir.path()));
        let backend = MemoryBackend::new(Vec::new());
        manager.register_device(device(&backend, "A")).unwrap();

        manager.teardown_all();

        assert!(manager.is_empty());
        assert!(backend.printer("A").unwrap().is_released());
    }
}
