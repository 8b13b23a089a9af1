//! Persistent per-printer configuration cache.
//!
//! The server sends each client a copy of every redirected printer's
//! configuration so that the next session can announce the printer with the
//! same settings.  The cache keeps that copy on disk:
//!
//! ```text
//! <config_root>/printers/<base64url(encoded printer name)>/
//!     port         DOS port name
//!     pnpName      Plug-and-Play name
//!     driverName   driver name
//!     blob         opaque cached configuration
//! ```
//!
//! # Why base64 everywhere? (for beginners)
//!
//! Printer names arrive as raw UTF-16 bytes and may contain `\`, `/` or
//! characters a file system rejects.  Encoding the bytes with the URL-safe
//! base64 alphabet gives a directory name that is valid on every platform,
//! deterministic, and reversible – two different names can never collide.
//! Field contents are binary too, so each field file holds standard base64
//! text.  An empty file is a zero-length field.
//!
//! # Crash safety
//!
//! Fields are written to a temporary file in the entry directory and then
//! renamed over the old file, so a crash leaves either the old or the new
//! value, never a truncated one.
//!
//! # Concurrency
//!
//! The store is not locked internally.  Callers serialize access per printer
//! name (control messages for one device are applied one at a time).

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use rdpdr_core::protocol::messages::announce_flags;
use rdpdr_core::{AnnouncePayload, ChannelStatus, EncodedName};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Name of the sub-directory of the config root holding printer entries.
pub const PRINTERS_DIR: &str = "printers";

/// One of the four fields of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheField {
    Port,
    PnpName,
    DriverName,
    Blob,
}

impl CacheField {
    pub const ALL: [CacheField; 4] = [
        CacheField::Port,
        CacheField::PnpName,
        CacheField::DriverName,
        CacheField::Blob,
    ];

    /// File name of the field inside the entry directory.
    pub fn file_name(self) -> &'static str {
        match self {
            CacheField::Port => "port",
            CacheField::PnpName => "pnpName",
            CacheField::DriverName => "driverName",
            CacheField::Blob => "blob",
        }
    }
}

/// Error type for cache store operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry directory exists for the printer.
    #[error("no cache entry for printer {0:?}")]
    NotFound(String),

    /// The entry exists but the requested field file does not.
    #[error("cache field {field} missing for printer {name:?}")]
    FieldMissing { name: String, field: &'static str },

    /// A file system error.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A field file does not contain valid base64.
    #[error("cache field at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: base64::DecodeError,
    },
}

impl CacheError {
    /// Channel status reported when a cache failure aborts an operation.
    pub fn status_code(&self) -> ChannelStatus {
        ChannelStatus::ERROR_INTERNAL_ERROR
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

/// Every field of an entry; fields that are missing or unreadable are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedPrinterConfig {
    pub port: Option<Vec<u8>>,
    pub pnp_name: Option<Vec<u8>>,
    pub driver_name: Option<Vec<u8>>,
    pub blob: Option<Vec<u8>>,
}

/// File-backed printer configuration cache.
#[derive(Debug, Clone)]
pub struct ConfigCacheStore {
    root: PathBuf,
}

impl ConfigCacheStore {
    /// Creates a store below `config_root`.  Nothing is created on disk yet.
    pub fn new(config_root: impl AsRef<Path>) -> Self {
        Self {
            root: config_root.as_ref().join(PRINTERS_DIR),
        }
    }

    /// Directory holding all entries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name for `name`: URL-safe base64 of the encoded name bytes.
    pub fn entry_key(name: &EncodedName) -> String {
        URL_SAFE.encode(name.as_bytes())
    }

    /// Directory of the entry for `name`, whether or not it exists.
    pub fn entry_dir(&self, name: &EncodedName) -> PathBuf {
        self.root.join(Self::entry_key(name))
    }

    /// Returns `true` if an entry directory exists for `name`.
    pub fn exists(&self, name: &EncodedName) -> bool {
        self.entry_dir(name).is_dir()
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Stores all four fields of an entry, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if any field cannot be written.  Fields
    /// written before the failure are kept.
    pub fn save(
        &self,
        name: &EncodedName,
        port: &[u8],
        pnp_name: &[u8],
        driver_name: &[u8],
        blob: &[u8],
    ) -> Result<(), CacheError> {
        self.write_field(name, CacheField::Port, port)?;
        self.write_field(name, CacheField::PnpName, pnp_name)?;
        self.write_field(name, CacheField::DriverName, driver_name)?;
        self.write_field(name, CacheField::Blob, blob)?;
        debug!(printer = %name.to_string_lossy(), "printer cache entry saved");
        Ok(())
    }

    /// Replaces the cached configuration blob.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the blob cannot be written.
    pub fn update(&self, name: &EncodedName, blob: &[u8]) -> Result<(), CacheError> {
        self.write_field(name, CacheField::Blob, blob)?;
        debug!(printer = %name.to_string_lossy(), len = blob.len(), "printer cache blob updated");
        Ok(())
    }

    /// Stores the driver name the device was created with.
    ///
    /// An empty driver name is not written, so an existing cached driver
    /// name survives.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the field cannot be written.
    pub fn save_default_driver(
        &self,
        name: &EncodedName,
        driver_name: &[u8],
    ) -> Result<(), CacheError> {
        if driver_name.is_empty() {
            return Ok(());
        }
        self.write_field(name, CacheField::DriverName, driver_name)
    }

    /// Removes an entry and every field in it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if there is no entry, or
    /// [`CacheError::Io`] if it cannot be removed.
    pub fn remove(&self, name: &EncodedName) -> Result<(), CacheError> {
        let dir = self.entry_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(printer = %name.to_string_lossy(), "printer cache entry removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CacheError::NotFound(name.to_string_lossy()))
            }
            Err(source) => Err(CacheError::Io { path: dir, source }),
        }
    }

    /// Moves the entry of `old` to `new`, replacing any entry `new` had.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] without touching anything if `old` has
    /// no entry, or [`CacheError::Io`] if the rename fails.
    pub fn move_entry(&self, old: &EncodedName, new: &EncodedName) -> Result<(), CacheError> {
        let from = self.entry_dir(old);
        let to = self.entry_dir(new);
        if !from.is_dir() {
            return Err(CacheError::NotFound(old.to_string_lossy()));
        }
        if from == to {
            return Ok(());
        }
        if to.exists() {
            fs::remove_dir_all(&to).map_err(|source| CacheError::Io {
                path: to.clone(),
                source,
            })?;
        }
        fs::rename(&from, &to).map_err(|source| CacheError::Io { path: from, source })?;
        debug!(
            old = %old.to_string_lossy(),
            new = %new.to_string_lossy(),
            "printer cache entry moved"
        );
        Ok(())
    }

    /// Writes one field atomically, creating the entry directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] on any file system failure.
    pub fn write_field(
        &self,
        name: &EncodedName,
        field: CacheField,
        data: &[u8],
    ) -> Result<(), CacheError> {
        let dir = self.entry_dir(name);
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(field.file_name());
        let tmp = dir.join(format!(".{}.tmp", field.file_name()));
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(STANDARD.encode(data).as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(io_err(&tmp))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        trace!(path = %path.display(), len = data.len(), "cache field written");
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Reads one field.  A missing entry or field is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`], [`CacheError::FieldMissing`],
    /// [`CacheError::Io`] or [`CacheError::Corrupt`].
    pub fn read_field(&self, name: &EncodedName, field: CacheField) -> Result<Vec<u8>, CacheError> {
        let dir = self.entry_dir(name);
        if !dir.is_dir() {
            return Err(CacheError::NotFound(name.to_string_lossy()));
        }
        let path = dir.join(field.file_name());
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::FieldMissing {
                    name: name.to_string_lossy(),
                    field: field.file_name(),
                })
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        STANDARD
            .decode(text.trim())
            .map_err(|source| CacheError::Corrupt { path, source })
    }

    /// Reads every field of an entry.  Unreadable fields come back as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if there is no entry.
    pub fn read_entry(&self, name: &EncodedName) -> Result<CachedPrinterConfig, CacheError> {
        if !self.exists(name) {
            return Err(CacheError::NotFound(name.to_string_lossy()));
        }
        let read = |field| match self.read_field(name, field) {
            Ok(data) => Some(data),
            Err(CacheError::FieldMissing { .. }) => None,
            Err(e) => {
                warn!("ignoring unreadable cache field: {e}");
                None
            }
        };
        Ok(CachedPrinterConfig {
            port: read(CacheField::Port),
            pnp_name: read(CacheField::PnpName),
            driver_name: read(CacheField::DriverName),
            blob: read(CacheField::Blob),
        })
    }

    /// Builds the announce payload for a printer from its cache entry.
    ///
    /// Missing or empty fields fall back: the PnP name and blob to empty, the
    /// driver name to `fallback_driver`.  Path separators in the printer name
    /// are replaced with `_` in the payload only.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if there is no entry; the caller
    /// treats that as a soft miss and announces defaults.
    pub fn load(
        &self,
        name: &EncodedName,
        fallback_driver: &[u8],
        is_default: bool,
    ) -> Result<AnnouncePayload, CacheError> {
        let entry = self.read_entry(name)?;
        let driver_name = entry
            .driver_name
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| fallback_driver.to_vec());

        Ok(AnnouncePayload {
            flags: if is_default {
                announce_flags::DEFAULT_PRINTER
            } else {
                0
            },
            code_page: 0,
            pnp_name: entry.pnp_name.unwrap_or_default(),
            driver_name,
            printer_name: name.with_separators_replaced(),
            cached_fields: entry.blob.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConfigCacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigCacheStore::new(dir.path());
        (dir, store)
    }

    fn name(s: &str) -> EncodedName {
        EncodedName::from_name(s)
    }

    // ── Addressing ────────────────────────────────────────────────────────────

    #[test]
    fn test_entry_key_is_url_safe_base64_of_name_bytes() {
        let key = ConfigCacheStore::entry_key(&EncodedName::from_wire(b"Office-Printer".to_vec()));
        assert_eq!(key, "T2ZmaWNlLVByaW50ZXI=");
    }

    #[test]
    fn test_entry_key_never_contains_path_separator() {
        // 0xFF 0xFF encodes to "//" in the standard alphabet.
        let key = ConfigCacheStore::entry_key(&EncodedName::from_wire(vec![0xFF, 0xFF, 0xFF]));
        assert!(!key.contains('/'));
        assert!(!key.contains('\\'));
    }

    #[test]
    fn test_different_names_get_different_dirs() {
        let (_dir, store) = store();
        assert_ne!(store.entry_dir(&name("a/b")), store.entry_dir(&name("a_b")));
    }

    // ── Round trips ───────────────────────────────────────────────────────────

    #[test]
    fn test_save_then_load_round_trip() {
        // Arrange
        let (_dir, store) = store();
        let printer = name("\\\\srv\\Office");
        let pnp = name("PNP1");
        let driver = name("GenericPCL");

        // Act
        store
            .save(&printer, b"PRN0001\0", pnp.as_bytes(), driver.as_bytes(), &[9, 8, 7])
            .unwrap();
        let payload = store.load(&printer, b"unused", true).unwrap();

        // Assert
        assert!(payload.is_default());
        assert_eq!(payload.code_page, 0);
        assert_eq!(payload.pnp_name, pnp.as_bytes());
        assert_eq!(payload.driver_name, driver.as_bytes());
        assert_eq!(payload.printer_name, name("__srv_Office").as_bytes());
        assert_eq!(payload.cached_fields, vec![9, 8, 7]);
        // The directory key is computed from the unmodified name.
        assert!(store.entry_dir(&printer).is_dir());
    }

    #[test]
    fn test_update_replaces_only_blob() {
        let (_dir, store) = store();
        let printer = name("Office");
        store.save(&printer, b"port", b"pnp", b"drv", b"old").unwrap();

        store.update(&printer, b"new").unwrap();

        let entry = store.read_entry(&printer).unwrap();
        assert_eq!(entry.blob.as_deref(), Some(&b"new"[..]));
        assert_eq!(entry.driver_name.as_deref(), Some(&b"drv"[..]));
    }

    #[test]
    fn test_empty_field_round_trips_as_empty() {
        let (_dir, store) = store();
        let printer = name("Office");

        store.write_field(&printer, CacheField::Blob, &[]).unwrap();

        assert_eq!(store.read_field(&printer, CacheField::Blob).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_field_files_hold_base64_text() {
        let (_dir, store) = store();
        let printer = name("Office");

        store.write_field(&printer, CacheField::Port, b"PRN1").unwrap();

        let text = fs::read_to_string(store.entry_dir(&printer).join("port")).unwrap();
        assert_eq!(text, "UFJOMQ==");
    }

    #[test]
    fn test_write_field_leaves_no_temp_file() {
        let (_dir, store) = store();
        let printer = name("Office");

        store.write_field(&printer, CacheField::Blob, b"abc").unwrap();
        store.write_field(&printer, CacheField::Blob, b"def").unwrap();

        let names: Vec<_> = fs::read_dir(store.entry_dir(&printer))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["blob"]);
    }

    // ── Soft misses ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_entry_is_not_found() {
        let (_dir, store) = store();

        let err = store.load(&name("Nobody"), b"drv", false).unwrap_err();

        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_with_missing_fields_uses_defaults() {
        // Arrange – only the blob exists
        let (_dir, store) = store();
        let printer = name("Office");
        store.update(&printer, b"cfg").unwrap();

        // Act
        let payload = store.load(&printer, b"live-driver", false).unwrap();

        // Assert
        assert_eq!(payload.flags, 0);
        assert!(payload.pnp_name.is_empty());
        assert_eq!(payload.driver_name, b"live-driver");
        assert_eq!(payload.cached_fields, b"cfg");
    }

    #[test]
    fn test_load_with_empty_driver_uses_fallback() {
        let (_dir, store) = store();
        let printer = name("Office");
        store.save(&printer, b"", b"", b"", b"").unwrap();

        let payload = store.load(&printer, b"live-driver", false).unwrap();

        assert_eq!(payload.driver_name, b"live-driver");
    }

    #[test]
    fn test_corrupt_field_is_strict_error_but_soft_in_bundle() {
        // Arrange
        let (_dir, store) = store();
        let printer = name("Office");
        store.save(&printer, b"p", b"pnp", b"drv", b"blob").unwrap();
        fs::write(store.entry_dir(&printer).join("pnpName"), "***not base64***").unwrap();

        // Act
        let strict = store.read_field(&printer, CacheField::PnpName);
        let bundle = store.read_entry(&printer).unwrap();

        // Assert
        assert!(matches!(strict, Err(CacheError::Corrupt { .. })));
        assert_eq!(bundle.pnp_name, None);
        assert_eq!(bundle.blob.as_deref(), Some(&b"blob"[..]));
    }

    #[test]
    fn test_read_field_missing_file_is_field_missing() {
        let (_dir, store) = store();
        let printer = name("Office");
        store.update(&printer, b"x").unwrap();

        let result = store.read_field(&printer, CacheField::Port);

        assert!(matches!(result, Err(CacheError::FieldMissing { field: "port", .. })));
    }

    #[test]
    fn test_reads_never_create_directories() {
        let (_dir, store) = store();
        let printer = name("Ghost");

        let _ = store.read_field(&printer, CacheField::Blob);
        let _ = store.read_entry(&printer);
        let _ = store.load(&printer, b"", false);

        assert!(!store.root().exists());
    }

    // ── Default driver ────────────────────────────────────────────────────────

    #[test]
    fn test_save_default_driver_skips_empty_driver() {
        let (_dir, store) = store();
        let printer = name("Office");
        store.save_default_driver(&printer, b"drv").unwrap();

        store.save_default_driver(&printer, b"").unwrap();

        assert_eq!(store.read_field(&printer, CacheField::DriverName).unwrap(), b"drv");
    }

    // ── Remove / move ─────────────────────────────────────────────────────────

    #[test]
    fn test_remove_deletes_entry() {
        let (_dir, store) = store();
        let printer = name("Office");
        store.save(&printer, b"p", b"n", b"d", b"b").unwrap();

        store.remove(&printer).unwrap();

        assert!(!store.exists(&printer));
        assert!(store.remove(&printer).unwrap_err().is_not_found());
    }

    #[test]
    fn test_move_then_load_new_succeeds_and_old_fails() {
        // Arrange
        let (_dir, store) = store();
        let old = name("Office");
        let new = name("Lobby");
        store.save(&old, b"p", b"pnp", b"drv", b"blob").unwrap();

        // Act
        store.move_entry(&old, &new).unwrap();

        // Assert
        let payload = store.load(&new, b"", false).unwrap();
        assert_eq!(payload.cached_fields, b"blob");
        assert_eq!(payload.printer_name, new.as_bytes());
        assert!(store.load(&old, b"", false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_move_missing_old_fails_without_side_effects() {
        // Arrange
        let (_dir, store) = store();
        let new = name("Lobby");
        store.update(&new, b"keep").unwrap();

        // Act
        let result = store.move_entry(&name("Ghost"), &new);

        // Assert
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(store.read_field(&new, CacheField::Blob).unwrap(), b"keep");
    }

    #[test]
    fn test_move_replaces_existing_target() {
        let (_dir, store) = store();
        let old = name("Office");
        let new = name("Lobby");
        store.save(&old, b"p", b"n", b"d", b"from-old").unwrap();
        store.save(&new, b"p", b"n", b"d", b"from-new").unwrap();

        store.move_entry(&old, &new).unwrap();

        assert_eq!(store.read_field(&new, CacheField::Blob).unwrap(), b"from-old");
        assert!(!store.exists(&old));
    }
}
