//! Integration tests for printer registration and the configuration cache.
//!
//! These tests exercise the application layer end-to-end: config file →
//! `Registrar` → `DeviceManager` → devices, with control messages applied
//! through the manager and the cache read back on the next registration.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use rdpdr_core::protocol::messages::{
    announce_flags, AddPrinterEvent, RenamePrinterEvent, UpdatePrinterEvent,
};
use rdpdr_core::{
    encode_printer_message, AnnouncePayload, ChannelResponder, ChannelStatus, EncodedName, Irp,
    IrpOutcome, MajorFunction, PrinterMessage,
};
use rdpdr_printer::application::device_manager::DeviceManager;
use rdpdr_printer::application::dispatch::{LoggingErrorSink, PrinterDevice};
use rdpdr_printer::application::registration::{PrinterRequest, Registrar};
use rdpdr_printer::infrastructure::backend::memory::MemoryBackend;
use rdpdr_printer::infrastructure::backend::{BackendRegistry, PrinterDriver};
use rdpdr_printer::infrastructure::storage::cache::ConfigCacheStore;
use rdpdr_printer::infrastructure::storage::config::{load_config_from, AppConfig};
use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────────────────────────

const CONFIG: &str = r#"
[session]
synchronous_channels = false

[printer]
default_backend = "memory"

[[printers]]
name = "Office"
driver = "Generic PCL"
is_default = true

[[printers]]
name = "Lobby"
driver = "Generic PostScript"
"#;

struct Fixture {
    _dir: TempDir,
    config: AppConfig,
    backends: BackendRegistry,
    memory: Arc<MemoryBackend>,
    manager: DeviceManager,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();
    let config = load_config_from(&path).unwrap();

    let memory = Arc::new(MemoryBackend::new(config.printer_specs()));
    let mut backends = BackendRegistry::with_builtin(
        config.printer.default_backend.clone(),
        dir.path().join("spool"),
        config.printer_specs(),
    );
    backends.register(Arc::clone(&memory) as Arc<dyn PrinterDriver>);
    let manager = DeviceManager::new(ConfigCacheStore::new(dir.path()));

    Fixture {
        _dir: dir,
        config,
        backends,
        memory,
        manager,
    }
}

impl Fixture {
    fn register(&self, request: &PrinterRequest) -> Vec<Arc<PrinterDevice>> {
        Registrar::new(
            &self.backends,
            self.manager.cache(),
            &self.manager,
            Arc::new(LoggingErrorSink),
            self.config.session.synchronous_channels,
        )
        .register(request)
        .unwrap()
    }
}

fn request(
    tx: &mpsc::Sender<IrpOutcome>,
    device_id: u32,
    completion_id: u32,
    major: MajorFunction,
    file_id: u32,
    input: Bytes,
) -> Irp {
    Irp::new(
        device_id,
        completion_id,
        file_id,
        major,
        input,
        Box::new(ChannelResponder::new(tx.clone())),
    )
}

// ── Registration tests ────────────────────────────────────────────────────────

#[test]
fn test_enumerated_printers_announce_defaults_on_cache_miss() {
    // Arrange
    let fx = fixture();

    // Act
    let devices = fx.register(&PrinterRequest::from_config(&fx.config));

    // Assert
    assert_eq!(devices.len(), 2);
    assert_eq!(fx.manager.len(), 2);
    let office = AnnouncePayload::decode(devices[0].announce_data()).unwrap();
    assert_eq!(office.flags, announce_flags::DEFAULT_PRINTER);
    assert!(office.pnp_name.is_empty());
    assert_eq!(office.driver_name, EncodedName::from_name("Generic PCL").as_bytes());
    assert_eq!(office.printer_name, EncodedName::from_name("Office").as_bytes());
    assert!(office.cached_fields.is_empty());
    let lobby = AnnouncePayload::decode(devices[1].announce_data()).unwrap();
    assert_eq!(lobby.flags, 0);
}

#[test]
fn test_cached_add_event_is_announced_on_next_registration() {
    // Arrange – first session registers, then the server sends an add event
    let fx = fixture();
    let devices = fx.register(&PrinterRequest::from_config(&fx.config));
    let device_id = devices[0].device_id().unwrap();
    let name = EncodedName::from_name("Office");
    let add = encode_printer_message(&PrinterMessage::AddPrinter(AddPrinterEvent {
        port_dos_name: *b"LPT1\0\0\0\0",
        pnp_name: EncodedName::from_name("PnP Office").as_bytes().to_vec(),
        driver_name: EncodedName::from_name("Server Driver").as_bytes().to_vec(),
        printer_name: name.clone(),
        cached_fields: vec![1, 2, 3, 4],
    }))
    .unwrap();
    fx.manager.handle_control(device_id, &add).unwrap();
    fx.manager.teardown_all();

    // Act – next session
    let devices = fx.register(&PrinterRequest::from_config(&fx.config));

    // Assert
    let payload = AnnouncePayload::decode(devices[0].announce_data()).unwrap();
    assert_eq!(payload.pnp_name, EncodedName::from_name("PnP Office").as_bytes());
    assert_eq!(payload.driver_name, EncodedName::from_name("Server Driver").as_bytes());
    assert_eq!(payload.cached_fields, vec![1, 2, 3, 4]);
}

#[test]
fn test_update_and_rename_events_move_cached_blob() {
    // Arrange
    let fx = fixture();
    let devices = fx.register(&PrinterRequest::from_config(&fx.config));
    let device_id = devices[0].device_id().unwrap();
    let old = EncodedName::from_name("Office");
    let new = EncodedName::from_name("Office 2");
    fx.manager.cache().save(&old, b"LPT1", b"", b"", b"v1").unwrap();

    // Act
    let update = encode_printer_message(&PrinterMessage::UpdatePrinter(UpdatePrinterEvent {
        printer_name: old.clone(),
        config_data: b"v2".to_vec(),
    }))
    .unwrap();
    fx.manager.handle_control(device_id, &update).unwrap();
    let rename = encode_printer_message(&PrinterMessage::RenamePrinter(RenamePrinterEvent {
        old_printer_name: old.clone(),
        new_printer_name: new.clone(),
    }))
    .unwrap();
    fx.manager.handle_control(device_id, &rename).unwrap();

    // Assert
    assert!(!fx.manager.cache().exists(&old));
    let payload = fx.manager.cache().load(&new, b"fallback", false).unwrap();
    assert_eq!(payload.cached_fields, b"v2");
    assert_eq!(payload.driver_name, b"fallback");
}

#[test]
fn test_malformed_control_message_is_invalid_data() {
    let fx = fixture();
    let devices = fx.register(&PrinterRequest::from_config(&fx.config));
    let device_id = devices[0].device_id().unwrap();

    let err = fx.manager.handle_control(device_id, &[0x50, 0x52]).unwrap_err();

    assert_eq!(err.status_code(), ChannelStatus::ERROR_INVALID_DATA);
}

#[test]
fn test_single_named_printer_saves_driver_to_cache() {
    // Arrange
    let fx = fixture();
    let request = PrinterRequest {
        name: Some("Annex".to_string()),
        driver: Some("Annex Driver:memory".to_string()),
        is_default: false,
    };

    // Act
    let devices = fx.register(&request);

    // Assert
    assert_eq!(devices.len(), 1);
    let cached = fx
        .manager
        .cache()
        .read_entry(&EncodedName::from_name("Annex"))
        .unwrap();
    assert_eq!(
        cached.driver_name.as_deref(),
        Some(EncodedName::from_name("Annex Driver").as_bytes())
    );
    assert!(cached.blob.is_none());
}

// ── Printing tests ────────────────────────────────────────────────────────────

#[test]
fn test_print_job_through_device_manager() {
    // Arrange
    let fx = fixture();
    let devices = fx.register(&PrinterRequest::from_config(&fx.config));
    let device_id = devices[0].device_id().unwrap();
    let (tx, rx) = mpsc::channel();
    let mut input = BytesMut::new();
    input.put_u32_le(5);
    input.put_u64_le(0);
    input.put_bytes(0, 20);
    input.put_slice(b"hello");

    // Act
    fx.manager
        .submit(request(&tx, device_id, 1, MajorFunction::Create, 0, Bytes::new()))
        .unwrap();
    let job_id = match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
        IrpOutcome::Completed(reply) => u32::from_le_bytes(reply.output[..4].try_into().unwrap()),
        other => panic!("create failed: {other:?}"),
    };
    fx.manager
        .submit(request(&tx, device_id, 2, MajorFunction::Write, job_id, input.freeze()))
        .unwrap();
    fx.manager
        .submit(request(&tx, device_id, 3, MajorFunction::Close, job_id, Bytes::new()))
        .unwrap();
    let rest: Vec<_> = (0..2)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    fx.manager.teardown_all();

    // Assert
    assert_eq!(job_id, 1);
    assert!(rest.iter().all(|o| matches!(o, IrpOutcome::Completed(_))));
    let jobs = fx.memory.printer("Office").unwrap().completed_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].data, b"hello");
}
