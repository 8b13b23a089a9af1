//! Printer control message types.
//!
//! Control messages are sent by the server on the device channel to keep the
//! client's printer configuration cache in sync.  All integers on the wire
//! are little-endian.

use crate::domain::name::EncodedName;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the common header: component (2) + packet id (2) + event id (4).
pub const HEADER_SIZE: usize = 8;

/// Component tag of printer messages (`"RP"` on the wire).
pub const RDPDR_CTYP_PRN: u16 = 0x5052;

/// Packet id of cache-data messages (add/update/delete/rename).
pub const PAKID_PRN_CACHE_DATA: u16 = 0x4343;

/// Packet id of the XPS-mode announcement (ignored by this client).
pub const PAKID_PRN_USING_XPS: u16 = 0x4F4B;

/// Length of the fixed DOS port name in an add event.
pub const PORT_DOS_NAME_LEN: usize = 8;

/// Cache-data event identifiers.
pub mod event_id {
    pub const ADD_PRINTER: u32 = 0x0000_0001;
    pub const UPDATE_PRINTER: u32 = 0x0000_0002;
    pub const DELETE_PRINTER: u32 = 0x0000_0003;
    pub const RENAME_PRINTER: u32 = 0x0000_0004;
}

/// Flags of the printer announce payload.
pub mod announce_flags {
    pub const ASCII: u32 = 0x0000_0001;
    pub const DEFAULT_PRINTER: u32 = 0x0000_0002;
    pub const NETWORK_PRINTER: u32 = 0x0000_0004;
    pub const TS_PRINTER: u32 = 0x0000_0008;
    pub const XPS_FORMAT: u32 = 0x0000_0010;
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A decoded printer control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterMessage {
    AddPrinter(AddPrinterEvent),
    UpdatePrinter(UpdatePrinterEvent),
    DeletePrinter(DeletePrinterEvent),
    RenamePrinter(RenamePrinterEvent),
    UsingXps(UsingXpsMessage),
}

impl PrinterMessage {
    /// Packet id this message is sent with.
    pub fn packet_id(&self) -> u16 {
        match self {
            PrinterMessage::UsingXps(_) => PAKID_PRN_USING_XPS,
            _ => PAKID_PRN_CACHE_DATA,
        }
    }

    /// Value of the 32-bit field following the packet id.
    pub fn event_id(&self) -> u32 {
        match self {
            PrinterMessage::AddPrinter(_) => event_id::ADD_PRINTER,
            PrinterMessage::UpdatePrinter(_) => event_id::UPDATE_PRINTER,
            PrinterMessage::DeletePrinter(_) => event_id::DELETE_PRINTER,
            PrinterMessage::RenamePrinter(_) => event_id::RENAME_PRINTER,
            PrinterMessage::UsingXps(m) => m.printer_id,
        }
    }
}

/// A printer was added on the server; all four cache fields are provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPrinterEvent {
    pub port_dos_name: [u8; PORT_DOS_NAME_LEN],
    pub pnp_name: Vec<u8>,
    pub driver_name: Vec<u8>,
    pub printer_name: EncodedName,
    pub cached_fields: Vec<u8>,
}

/// The cached configuration blob of a printer changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePrinterEvent {
    pub printer_name: EncodedName,
    pub config_data: Vec<u8>,
}

/// A printer was removed on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePrinterEvent {
    pub printer_name: EncodedName,
}

/// A printer was renamed on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePrinterEvent {
    pub old_printer_name: EncodedName,
    pub new_printer_name: EncodedName,
}

/// The server switched a printer to XPS mode.  Logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsingXpsMessage {
    /// Carried in the event-id slot of the header.
    pub printer_id: u32,
    pub flags: u32,
}
