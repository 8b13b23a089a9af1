//! Binary codec for printer control messages.
//!
//! Wire format:
//! ```text
//! [component:2][packet_id:2][event_id:4][payload:N]
//! ```
//! All integers are little-endian.  Cache-data payloads carry every length
//! prefix up front, followed by the variable-length fields in the same order:
//!
//! ```text
//! Add:    [port:8][pnp_len:4][driver_len:4][name_len:4][cache_len:4][pnp][driver][name][cache]
//! Update: [name_len:4][config_len:4][name][config]
//! Delete: [name_len:4][name]
//! Rename: [old_len:4][new_len:4][old][new]
//! XPS:    [flags:4]
//! ```
//!
//! # Fail closed
//!
//! Every length is checked against the bytes that remain **before** the field
//! is read.  Decoding is pure – it builds a [`PrinterMessage`] and touches
//! nothing else – so a truncated buffer can never cause a partial cache write.
//! Trailing bytes after the last field are ignored.

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::domain::name::EncodedName;
use crate::protocol::messages::{
    event_id, AddPrinterEvent, DeletePrinterEvent, PrinterMessage, RenamePrinterEvent,
    UpdatePrinterEvent, UsingXpsMessage, HEADER_SIZE, PAKID_PRN_CACHE_DATA, PAKID_PRN_USING_XPS,
    PORT_DOS_NAME_LEN, RDPDR_CTYP_PRN,
};
use crate::status::ChannelStatus;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// A fixed field or a length-prefixed field extends past the buffer.
    #[error("insufficient data for {context}: need {needed} bytes, got {available}")]
    InsufficientData {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// The component tag is not the printer component.
    #[error("unexpected component: 0x{0:04X}")]
    UnknownComponent(u16),

    /// The packet id is not a known printer packet.
    #[error("unknown printing component packet id: 0x{0:04X}")]
    UnknownPacketId(u16),

    /// The cache-data event id is not add/update/delete/rename.
    #[error("unknown cache data event id: 0x{0:08X}")]
    UnknownEventId(u32),

    /// A field is too long for its 32-bit length prefix.
    #[error("{context} is too long to encode: {len} bytes")]
    FieldTooLong { context: &'static str, len: usize },
}

impl ProtocolError {
    /// Channel status reported for this error.
    pub fn status_code(&self) -> ChannelStatus {
        ChannelStatus::ERROR_INVALID_DATA
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one printer control message from `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the buffer is truncated, a length prefix
/// exceeds the remaining bytes, or a tag is unknown.
///
/// # Examples
///
/// ```rust
/// use rdpdr_core::protocol::{decode_printer_message, encode_printer_message};
/// use rdpdr_core::protocol::messages::{DeletePrinterEvent, PrinterMessage};
/// use rdpdr_core::EncodedName;
///
/// let msg = PrinterMessage::DeletePrinter(DeletePrinterEvent {
///     printer_name: EncodedName::from_name("Office"),
/// });
/// let bytes = encode_printer_message(&msg).unwrap();
/// assert_eq!(decode_printer_message(&bytes).unwrap(), msg);
/// ```
pub fn decode_printer_message(bytes: &[u8]) -> Result<PrinterMessage, ProtocolError> {
    let mut src = bytes;
    require(src, HEADER_SIZE, "header")?;

    let component = src.get_u16_le();
    let packet_id = src.get_u16_le();
    if component != RDPDR_CTYP_PRN {
        return Err(ProtocolError::UnknownComponent(component));
    }
    let event = src.get_u32_le();

    match packet_id {
        PAKID_PRN_CACHE_DATA => decode_cache_data(event, &mut src),
        PAKID_PRN_USING_XPS => {
            require(src, 4, "UsingXps")?;
            Ok(PrinterMessage::UsingXps(UsingXpsMessage {
                printer_id: event,
                flags: src.get_u32_le(),
            }))
        }
        other => Err(ProtocolError::UnknownPacketId(other)),
    }
}

/// Encodes a [`PrinterMessage`] including the 8-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::FieldTooLong`] if a field does not fit a 32-bit
/// length prefix.
pub fn encode_printer_message(msg: &PrinterMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + 64);
    buf.put_u16_le(RDPDR_CTYP_PRN);
    buf.put_u16_le(msg.packet_id());
    buf.put_u32_le(msg.event_id());

    match msg {
        PrinterMessage::AddPrinter(m) => {
            buf.put_slice(&m.port_dos_name);
            put_len(&mut buf, &m.pnp_name, "PnPName")?;
            put_len(&mut buf, &m.driver_name, "DriverName")?;
            put_len(&mut buf, m.printer_name.as_bytes(), "PrinterName")?;
            put_len(&mut buf, &m.cached_fields, "CachedFields")?;
            buf.put_slice(&m.pnp_name);
            buf.put_slice(&m.driver_name);
            buf.put_slice(m.printer_name.as_bytes());
            buf.put_slice(&m.cached_fields);
        }
        PrinterMessage::UpdatePrinter(m) => {
            put_len(&mut buf, m.printer_name.as_bytes(), "PrinterName")?;
            put_len(&mut buf, &m.config_data, "ConfigData")?;
            buf.put_slice(m.printer_name.as_bytes());
            buf.put_slice(&m.config_data);
        }
        PrinterMessage::DeletePrinter(m) => {
            put_len(&mut buf, m.printer_name.as_bytes(), "PrinterName")?;
            buf.put_slice(m.printer_name.as_bytes());
        }
        PrinterMessage::RenamePrinter(m) => {
            put_len(&mut buf, m.old_printer_name.as_bytes(), "OldPrinterName")?;
            put_len(&mut buf, m.new_printer_name.as_bytes(), "NewPrinterName")?;
            buf.put_slice(m.old_printer_name.as_bytes());
            buf.put_slice(m.new_printer_name.as_bytes());
        }
        PrinterMessage::UsingXps(m) => buf.put_u32_le(m.flags),
    }
    Ok(buf)
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_cache_data(event: u32, src: &mut &[u8]) -> Result<PrinterMessage, ProtocolError> {
    match event {
        event_id::ADD_PRINTER => decode_add(src).map(PrinterMessage::AddPrinter),
        event_id::UPDATE_PRINTER => decode_update(src).map(PrinterMessage::UpdatePrinter),
        event_id::DELETE_PRINTER => decode_delete(src).map(PrinterMessage::DeletePrinter),
        event_id::RENAME_PRINTER => decode_rename(src).map(PrinterMessage::RenamePrinter),
        other => Err(ProtocolError::UnknownEventId(other)),
    }
}

fn decode_add(src: &mut &[u8]) -> Result<AddPrinterEvent, ProtocolError> {
    // 8 (port) + 4 lengths × 4
    require(*src, PORT_DOS_NAME_LEN + 16, "AddPrinter")?;
    let mut port_dos_name = [0u8; PORT_DOS_NAME_LEN];
    src.copy_to_slice(&mut port_dos_name);
    let pnp_len = src.get_u32_le();
    let driver_len = src.get_u32_le();
    let name_len = src.get_u32_le();
    let cache_len = src.get_u32_le();

    let pnp_name = take_field(src, pnp_len, "AddPrinter.PnPName")?;
    let driver_name = take_field(src, driver_len, "AddPrinter.DriverName")?;
    let printer_name = take_field(src, name_len, "AddPrinter.PrinterName")?;
    let cached_fields = take_field(src, cache_len, "AddPrinter.CachedFields")?;

    Ok(AddPrinterEvent {
        port_dos_name,
        pnp_name: pnp_name.to_vec(),
        driver_name: driver_name.to_vec(),
        printer_name: EncodedName::from(printer_name),
        cached_fields: cached_fields.to_vec(),
    })
}

fn decode_update(src: &mut &[u8]) -> Result<UpdatePrinterEvent, ProtocolError> {
    require(*src, 8, "UpdatePrinter")?;
    let name_len = src.get_u32_le();
    let config_len = src.get_u32_le();

    let printer_name = take_field(src, name_len, "UpdatePrinter.PrinterName")?;
    let config_data = take_field(src, config_len, "UpdatePrinter.ConfigData")?;

    Ok(UpdatePrinterEvent {
        printer_name: EncodedName::from(printer_name),
        config_data: config_data.to_vec(),
    })
}

fn decode_delete(src: &mut &[u8]) -> Result<DeletePrinterEvent, ProtocolError> {
    require(*src, 4, "DeletePrinter")?;
    let name_len = src.get_u32_le();
    let printer_name = take_field(src, name_len, "DeletePrinter.PrinterName")?;
    Ok(DeletePrinterEvent {
        printer_name: EncodedName::from(printer_name),
    })
}

fn decode_rename(src: &mut &[u8]) -> Result<RenamePrinterEvent, ProtocolError> {
    require(*src, 8, "RenamePrinter")?;
    let old_len = src.get_u32_le();
    let new_len = src.get_u32_le();

    let old_name = take_field(src, old_len, "RenamePrinter.OldPrinterName")?;
    let new_name = take_field(src, new_len, "RenamePrinter.NewPrinterName")?;

    Ok(RenamePrinterEvent {
        old_printer_name: EncodedName::from(old_name),
        new_printer_name: EncodedName::from(new_name),
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require(buf: &[u8], needed: usize, context: &'static str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::InsufficientData {
            context,
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Splits a `len`-byte field off the front of `src`.
fn take_field<'a>(
    src: &mut &'a [u8],
    len: u32,
    context: &'static str,
) -> Result<&'a [u8], ProtocolError> {
    let len = len as usize;
    require(*src, len, context)?;
    let (field, rest) = src.split_at(len);
    *src = rest;
    Ok(field)
}

fn put_len(buf: &mut Vec<u8>, field: &[u8], context: &'static str) -> Result<(), ProtocolError> {
    let len = u32::try_from(field.len()).map_err(|_| ProtocolError::FieldTooLong {
        context,
        len: field.len(),
    })?;
    buf.put_u32_le(len);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
