//! Applies printer control messages to the configuration cache.
//!
//! Decoding happens first and is all-or-nothing, so a malformed message
//! never touches the cache.  Then each event maps to one cache operation:
//!
//! | Event  | Cache operation      | On failure                     |
//! |--------|----------------------|--------------------------------|
//! | add    | `save` (all fields)  | internal error                 |
//! | update | `update` (blob)      | internal error                 |
//! | delete | `remove`             | logged, not an error           |
//! | rename | `move_entry`         | internal error                 |
//! | XPS    | –                    | logged and ignored             |

use rdpdr_core::{decode_printer_message, ChannelStatus, PrinterMessage, ProtocolError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::storage::cache::{CacheError, ConfigCacheStore};

/// Error type for applying a control message.
#[derive(Debug, Error)]
pub enum CacheEventError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to {operation} printer cache entry: {source}")]
    Cache {
        operation: &'static str,
        #[source]
        source: CacheError,
    },
}

impl CacheEventError {
    pub fn status_code(&self) -> ChannelStatus {
        match self {
            CacheEventError::Protocol(e) => e.status_code(),
            CacheEventError::Cache { .. } => ChannelStatus::ERROR_INTERNAL_ERROR,
        }
    }
}

/// Decodes `bytes` and applies the message to `store`.
///
/// # Errors
///
/// Returns [`CacheEventError::Protocol`] for malformed input (the cache is
/// untouched) and [`CacheEventError::Cache`] if a cache write fails.
pub fn handle_printer_message(
    store: &ConfigCacheStore,
    bytes: &[u8],
) -> Result<PrinterMessage, CacheEventError> {
    let msg = decode_printer_message(bytes)?;
    apply_printer_message(store, &msg)?;
    Ok(msg)
}

/// Applies a decoded message to `store`.
///
/// # Errors
///
/// Returns [`CacheEventError::Cache`] if saving, updating or renaming fails.
pub fn apply_printer_message(
    store: &ConfigCacheStore,
    msg: &PrinterMessage,
) -> Result<(), CacheEventError> {
    match msg {
        PrinterMessage::AddPrinter(add) => {
            debug!(printer = %add.printer_name.to_string_lossy(), "add printer event");
            store
                .save(
                    &add.printer_name,
                    &add.port_dos_name,
                    &add.pnp_name,
                    &add.driver_name,
                    &add.cached_fields,
                )
                .map_err(|source| CacheEventError::Cache {
                    operation: "save",
                    source,
                })
        }
        PrinterMessage::UpdatePrinter(update) => {
            debug!(printer = %update.printer_name.to_string_lossy(), "update printer event");
            store
                .update(&update.printer_name, &update.config_data)
                .map_err(|source| CacheEventError::Cache {
                    operation: "update",
                    source,
                })
        }
        PrinterMessage::DeletePrinter(delete) => {
            debug!(printer = %delete.printer_name.to_string_lossy(), "delete printer event");
            if let Err(e) = store.remove(&delete.printer_name) {
                warn!("ignoring failed printer cache removal: {e}");
            }
            Ok(())
        }
        PrinterMessage::RenamePrinter(rename) => {
            debug!(
                old = %rename.old_printer_name.to_string_lossy(),
                new = %rename.new_printer_name.to_string_lossy(),
                "rename printer event"
            );
            store
                .move_entry(&rename.old_printer_name, &rename.new_printer_name)
                .map_err(|source| CacheEventError::Cache {
                    operation: "rename",
                    source,
                })
        }
        PrinterMessage::UsingXps(xps) => {
            info!(
                printer_id = xps.printer_id,
                flags = xps.flags,
                "server switched printer to XPS mode, ignoring"
            );
            Ok(())
        }
    }
}
