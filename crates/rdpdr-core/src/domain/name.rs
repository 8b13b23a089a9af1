//! Encoded printer names.
//!
//! Printer names travel on the device channel as UTF-16LE byte strings that
//! are normally terminated by a NUL code unit.  The configuration cache is
//! keyed by exactly those bytes, so [`EncodedName`] keeps the raw bytes and
//! never normalises them.  Only the announce payload gets a sanitised copy
//! with path separators replaced (see [`EncodedName::with_separators_replaced`]).

use std::fmt;

/// UTF-16 code units treated as path separators.
const SEPARATORS: [u16; 2] = [b'\\' as u16, b'/' as u16];

/// Replacement code unit for path separators.
const REPLACEMENT: u16 = b'_' as u16;

/// A device name in its wire encoding.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct EncodedName(Vec<u8>);

impl EncodedName {
    /// Encodes a local printer name as UTF-16LE followed by a NUL code unit.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rdpdr_core::EncodedName;
    ///
    /// let name = EncodedName::from_name("HP");
    /// assert_eq!(name.as_bytes(), &[b'H', 0, b'P', 0, 0, 0]);
    /// ```
    pub fn from_name(name: &str) -> Self {
        let mut bytes = Vec::with_capacity((name.len() + 1) * 2);
        for unit in name.encode_utf16().chain(std::iter::once(0)) {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        Self(bytes)
    }

    /// Wraps bytes exactly as received from the wire.
    pub fn from_wire(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy in which every `\` or `/` UTF-16 code unit is replaced
    /// by `_`.  A trailing odd byte is copied unchanged.
    pub fn with_separators_replaced(&self) -> Vec<u8> {
        let mut out = self.0.clone();
        for pair in out.chunks_exact_mut(2) {
            let unit = u16::from_le_bytes([pair[0], pair[1]]);
            if SEPARATORS.contains(&unit) {
                pair.copy_from_slice(&REPLACEMENT.to_le_bytes());
            }
        }
        out
    }

    /// Decodes the name for display, dropping trailing NUL code units.
    pub fn to_string_lossy(&self) -> String {
        let units: Vec<u16> = self
            .0
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let end = units.iter().rposition(|&u| u != 0).map_or(0, |i| i + 1);
        String::from_utf16_lossy(&units[..end])
    }
}

impl fmt::Debug for EncodedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedName({:?}, {} bytes)", self.to_string_lossy(), self.0.len())
    }
}

impl From<&[u8]> for EncodedName {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}
