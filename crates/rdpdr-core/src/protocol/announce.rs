//! The printer announce payload.
//!
//! When a printer is announced to the server, the device carries a payload
//! describing its identity and cached settings:
//!
//! ```text
//! [flags:4][code_page:4][pnp_len:4][driver_len:4][name_len:4][cache_len:4]
//! [pnp_name][driver_name][printer_name][cached_fields]
//! ```
//!
//! `code_page` is reserved and always written as zero.

use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::announce_flags;

/// Size of the fixed part of the payload.
pub const ANNOUNCE_FIXED_SIZE: usize = 24;

/// A printer announce payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnouncePayload {
    pub flags: u32,
    pub code_page: u32,
    pub pnp_name: Vec<u8>,
    pub driver_name: Vec<u8>,
    pub printer_name: Vec<u8>,
    pub cached_fields: Vec<u8>,
}

impl AnnouncePayload {
    /// Returns `true` when the default-printer flag is set.
    pub fn is_default(&self) -> bool {
        self.flags & announce_flags::DEFAULT_PRINTER != 0
    }

    /// Size of the encoded payload in bytes.
    pub fn encoded_len(&self) -> usize {
        ANNOUNCE_FIXED_SIZE
            + self.pnp_name.len()
            + self.driver_name.len()
            + self.printer_name.len()
            + self.cached_fields.len()
    }

    /// Replaces the contents of `buf` with the encoded payload.
    ///
    /// The buffer is reused across announcements, so its allocation is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FieldTooLong`] if a field does not fit a
    /// 32-bit length.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let fields: [(&[u8], &'static str); 4] = [
            (&self.pnp_name, "PnPName"),
            (&self.driver_name, "DriverName"),
            (&self.printer_name, "PrinterName"),
            (&self.cached_fields, "CachedFields"),
        ];
        let mut lengths = [0u32; 4];
        for (slot, (field, context)) in lengths.iter_mut().zip(fields.iter()) {
            *slot = u32::try_from(field.len()).map_err(|_| ProtocolError::FieldTooLong {
                context,
                len: field.len(),
            })?;
        }

        buf.clear();
        buf.reserve(self.encoded_len());
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.code_page);
        for len in lengths {
            buf.put_u32_le(len);
        }
        for (field, _) in fields {
            buf.put_slice(field);
        }
        Ok(())
    }

    /// Decodes a payload produced by [`AnnouncePayload::encode_into`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if the buffer is truncated.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = bytes;
        if src.len() < ANNOUNCE_FIXED_SIZE {
            return Err(ProtocolError::InsufficientData {
                context: "Announce",
                needed: ANNOUNCE_FIXED_SIZE,
                available: src.len(),
            });
        }
        let flags = src.get_u32_le();
        let code_page = src.get_u32_le();
        let lengths = [
            src.get_u32_le() as usize,
            src.get_u32_le() as usize,
            src.get_u32_le() as usize,
            src.get_u32_le() as usize,
        ];

        let mut fields = Vec::with_capacity(4);
        for (len, context) in lengths.into_iter().zip([
            "Announce.PnPName",
            "Announce.DriverName",
            "Announce.PrinterName",
            "Announce.CachedFields",
        ]) {
            if src.len() < len {
                return Err(ProtocolError::InsufficientData {
                    context,
                    needed: len,
                    available: src.len(),
                });
            }
            let (field, rest) = src.split_at(len);
            fields.push(field.to_vec());
            src = rest;
        }

        let mut fields = fields.into_iter();
        Ok(Self {
            flags,
            code_page,
            pnp_name: fields.next().unwrap_or_default(),
            driver_name: fields.next().unwrap_or_default(),
            printer_name: fields.next().unwrap_or_default(),
            cached_fields: fields.next().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_writes_lengths_then_fields() {
        // Arrange
        let payload = AnnouncePayload {
            flags: announce_flags::DEFAULT_PRINTER,
            code_page: 0,
            pnp_name: b"PNP1".to_vec(),
            driver_name: b"GenericPCL".to_vec(),
            printer_name: b"Office-Printer".to_vec(),
            cached_fields: vec![],
        };
        let mut buf = BytesMut::new();

        // Act
        payload.encode_into(&mut buf).unwrap();

        // Assert
        let words: Vec<u32> = buf[..24]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(words, vec![2, 0, 4, 10, 14, 0]);
        assert_eq!(&buf[24..28], b"PNP1");
        assert_eq!(buf.len(), payload.encoded_len());
        assert_eq!(AnnouncePayload::decode(&buf).unwrap(), payload);
    }

    #[test]
    fn test_encode_into_replaces_previous_contents() {
        let mut buf = BytesMut::from(&b"stale data that is longer than the payload"[..]);
        AnnouncePayload::default().encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), ANNOUNCE_FIXED_SIZE);
    }

    #[test]
    fn test_decode_truncated_field_is_rejected() {
        let mut buf = BytesMut::new();
        AnnouncePayload {
            driver_name: b"drv".to_vec(),
            ..Default::default()
        }
        .encode_into(&mut buf)
        .unwrap();
        let result = AnnouncePayload::decode(&buf[..buf.len() - 1]);
        assert!(matches!(
            result,
            Err(ProtocolError::InsufficientData { context: "Announce.DriverName", .. })
        ));
    }

    #[test]
    fn test_is_default_reads_flag() {
        let payload = AnnouncePayload {
            flags: announce_flags::DEFAULT_PRINTER,
            ..Default::default()
        };
        assert!(payload.is_default());
        assert!(!AnnouncePayload::default().is_default());
    }
}
