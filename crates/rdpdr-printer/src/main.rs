//! rdpdr-printer command-line entry point.
//!
//! Drives the printer redirection core without a remote desktop session:
//! printers are registered against the configured backend, control messages
//! are read from files, and print data is pushed through the same request
//! path the server would use.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config (--config or platform default)
//!  └─ Session::open()     -- backends, cache, device manager
//!       ├─ announce        register, print announce data, tear down
//!       ├─ apply FILE      decode a control message, update the cache
//!       ├─ show NAME       dump a cache entry
//!       ├─ print FILE      create / write / close through a device
//!       └─ watch           register and idle until Ctrl-C
//! ```

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rdpdr_core::{ChannelResponder, EncodedName, Irp, IrpOutcome, MajorFunction};
use rdpdr_printer::application::cache_events;
use rdpdr_printer::application::device_manager::DeviceManager;
use rdpdr_printer::application::dispatch::{LoggingErrorSink, PrinterDevice};
use rdpdr_printer::application::irp_handlers::WRITE_HEADER_SIZE;
use rdpdr_printer::application::registration::{PrinterRequest, Registrar};
use rdpdr_printer::infrastructure::backend::BackendRegistry;
use rdpdr_printer::infrastructure::storage::cache::ConfigCacheStore;
use rdpdr_printer::infrastructure::storage::config::{self, AppConfig};

/// Bytes per write request when printing a file.
const WRITE_CHUNK_SIZE: usize = 16 * 1024;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Printer device redirection tool.
#[derive(Debug, Parser)]
#[command(
    name = "rdpdr-printer",
    about = "Printer redirection core: device dispatch and configuration cache",
    version
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, env = "RDPDR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes a default config file.
    Init,
    /// Registers the configured printers and prints their announce data.
    Announce,
    /// Applies a printer control message read from FILE to the cache.
    Apply { file: PathBuf },
    /// Shows the cached configuration of printer NAME.
    Show { name: String },
    /// Prints FILE through a registered printer.
    Print {
        file: PathBuf,
        /// Printer to use; defaults to the first registered one.
        #[arg(long)]
        printer: Option<String>,
    },
    /// Registers the configured printers and waits for Ctrl-C.
    Watch,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Backends, cache and device manager of one run.
struct Session {
    config: AppConfig,
    backends: BackendRegistry,
    manager: DeviceManager,
}

impl Session {
    fn open(config: AppConfig) -> anyhow::Result<Self> {
        let backends = BackendRegistry::with_builtin(
            config.printer.default_backend.clone(),
            config.spool_dir()?,
            config.printer_specs(),
        );
        let cache = ConfigCacheStore::new(config.cache_root()?);
        Ok(Self {
            config,
            backends,
            manager: DeviceManager::new(cache),
        })
    }

    fn register(&self) -> anyhow::Result<Vec<Arc<PrinterDevice>>> {
        let registrar = Registrar::new(
            &self.backends,
            self.manager.cache(),
            &self.manager,
            Arc::new(LoggingErrorSink),
            self.config.session.synchronous_channels,
        );
        let devices = registrar
            .register(&PrinterRequest::from_config(&self.config))
            .context("printer registration failed")?;
        if devices.is_empty() {
            warn!("no printers registered");
        }
        Ok(devices)
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn announce(session: &Session) -> anyhow::Result<()> {
    for device in session.register()? {
        println!(
            "{}\tid={}\tprinter={}\tannounce={}",
            device.label(),
            device.device_id().unwrap_or_default(),
            device.printer().name(),
            STANDARD.encode(device.announce_data()),
        );
    }
    session.manager.teardown_all();
    Ok(())
}

fn apply(cache: &ConfigCacheStore, file: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let msg = cache_events::handle_printer_message(cache, &bytes)
        .with_context(|| format!("applying control message from {}", file.display()))?;
    println!("applied {msg:?}");
    Ok(())
}

fn show(cache: &ConfigCacheStore, name: &str) -> anyhow::Result<()> {
    let entry = cache.read_entry(&EncodedName::from_name(name))?;
    let field = |data: &Option<Vec<u8>>| data.as_deref().map_or("-".to_string(), |d| STANDARD.encode(d));
    println!("dir:    {}", cache.entry_dir(&EncodedName::from_name(name)).display());
    println!("port:   {}", field(&entry.port));
    println!("pnp:    {}", field(&entry.pnp_name));
    println!("driver: {}", field(&entry.driver_name));
    println!("blob:   {}", field(&entry.blob));
    Ok(())
}

/// Sends one request to `device_id` and waits for its outcome.
fn round_trip(
    manager: &DeviceManager,
    outcomes: &mpsc::Receiver<IrpOutcome>,
    irp: Irp,
) -> anyhow::Result<Bytes> {
    let completion_id = irp.completion_id;
    manager.submit(irp)?;
    match outcomes.recv()? {
        IrpOutcome::Completed(reply) if reply.io_status.is_success() => Ok(reply.output),
        IrpOutcome::Completed(reply) => {
            bail!("request {completion_id} failed with {:?}", reply.io_status)
        }
        IrpOutcome::Discarded { .. } => bail!("request {completion_id} was discarded"),
    }
}

fn print_file(session: &Session, file: &Path, printer: Option<&str>) -> anyhow::Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let devices = session.register()?;
    let device = match printer {
        Some(name) => devices.iter().find(|d| d.printer().name() == name),
        None => devices.first(),
    }
    .context("no matching printer registered")?;
    let device_id = device.device_id().context("device has no id")?;

    let (tx, rx) = mpsc::channel();
    let mut completion_id = 0u32;
    let mut request = |major: MajorFunction, file_id: u32, input: Bytes| {
        completion_id += 1;
        Irp::new(
            device_id,
            completion_id,
            file_id,
            major,
            input,
            Box::new(ChannelResponder::new(tx.clone())),
        )
    };

    let created = round_trip(&session.manager, &rx, request(MajorFunction::Create, 0, Bytes::new()))?;
    let job_id = created
        .get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .context("create returned no job id")?;

    for chunk in data.chunks(WRITE_CHUNK_SIZE) {
        let mut input = BytesMut::with_capacity(WRITE_HEADER_SIZE + chunk.len());
        input.put_u32_le(chunk.len() as u32);
        input.put_u64_le(0);
        input.put_bytes(0, WRITE_HEADER_SIZE - 12);
        input.put_slice(chunk);
        round_trip(&session.manager, &rx, request(MajorFunction::Write, job_id, input.freeze()))?;
    }

    round_trip(&session.manager, &rx, request(MajorFunction::Close, job_id, Bytes::new()))?;
    info!(job_id, bytes = data.len(), printer = device.printer().name(), "print job finished");
    println!("job {job_id} printed {} bytes on {}", data.len(), device.label());

    session.manager.teardown_all();
    Ok(())
}

async fn watch(session: &Session) -> anyhow::Result<()> {
    let devices = session.register()?;
    info!(count = devices.len(), "printers registered.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    session.manager.teardown_all();
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::config_file_path()?,
    };
    let app_config = config::load_config_from(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&app_config.session.log_level)),
        )
        .init();

    info!(config = %config_path.display(), "rdpdr-printer starting");

    match cli.command {
        Command::Init => {
            config::save_config_to(&app_config, &config_path)?;
            println!("wrote {}", config_path.display());
        }
        Command::Announce => announce(&Session::open(app_config)?)?,
        Command::Apply { file } => {
            let session = Session::open(app_config)?;
            apply(session.manager.cache(), &file)?;
        }
        Command::Show { name } => {
            let session = Session::open(app_config)?;
            show(session.manager.cache(), &name)?;
        }
        Command::Print { file, printer } => {
            let session = Session::open(app_config)?;
            tokio::task::spawn_blocking(move || print_file(&session, &file, printer.as_deref()))
                .await??;
        }
        Command::Watch => watch(&Session::open(app_config)?).await?,
    }

    Ok(())
}
