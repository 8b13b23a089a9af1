//! Status codes used on the device channel.
//!
//! Two families of codes exist:
//!
//! - [`NtStatus`] values are written into every completed request record and
//!   travel back to the server (`IoStatus`).
//! - [`ChannelStatus`] values are Win32/channel return codes.  They are never
//!   sent on the wire by this crate; they are what a device reports to the
//!   session's error sink when something fatal happens.

use std::fmt;

/// An NTSTATUS value carried in an I/O completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const UNSUCCESSFUL: NtStatus = NtStatus(0xC000_0001);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);
    pub const PRINT_QUEUE_FULL: NtStatus = NtStatus(0xC000_00C6);

    /// Returns `true` for `STATUS_SUCCESS`.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Self::SUCCESS => Some("STATUS_SUCCESS"),
            Self::UNSUCCESSFUL => Some("STATUS_UNSUCCESSFUL"),
            Self::NOT_SUPPORTED => Some("STATUS_NOT_SUPPORTED"),
            Self::PRINT_QUEUE_FULL => Some("STATUS_PRINT_QUEUE_FULL"),
            _ => None,
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// A Win32 / virtual channel return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelStatus(pub u32);

impl ChannelStatus {
    pub const OK: ChannelStatus = ChannelStatus(0);
    pub const NO_MEMORY: ChannelStatus = ChannelStatus(12);
    pub const INITIALIZATION_ERROR: ChannelStatus = ChannelStatus(20);
    pub const ERROR_INVALID_DATA: ChannelStatus = ChannelStatus(13);
    pub const ERROR_INVALID_PARAMETER: ChannelStatus = ChannelStatus(87);
    pub const ERROR_INTERNAL_ERROR: ChannelStatus = ChannelStatus(1359);
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
