//! The 24-byte Tiger tree root: the content address of a file.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;

/// Size in bytes of a Tiger hash / tree root.
pub const ROOT_BYTES: usize = 24;

/// A Tiger-tree root hash.
///
/// Printed and parsed as the 39-character unpadded base-32 encoding used by
/// the TTH convention (RFC 4648 alphabet, no padding: `ceil(24 * 8 / 5) ==
/// 39` characters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootValue(pub [u8; ROOT_BYTES]);

impl RootValue {
    /// Wrap a raw 24-byte digest.
    #[must_use]
    pub fn new(bytes: [u8; ROOT_BYTES]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ROOT_BYTES] {
        &self.0
    }
}

impl AsRef<[u8]> for RootValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RootValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE32_NOPAD.encode(&self.0))
    }
}

/// Error returned when a string is not a valid 39-character base-32 root.
#[derive(Debug, thiserror::Error)]
#[error("invalid TTH root string: {0}")]
pub struct ParseRootError(String);

impl FromStr for RootValue {
    type Err = ParseRootError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| ParseRootError(s.to_owned()))?;
        let bytes: [u8; ROOT_BYTES] = decoded
            .try_into()
            .map_err(|_| ParseRootError(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; ROOT_BYTES]> for RootValue {
    fn from(bytes: [u8; ROOT_BYTES]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_len_is_39() {
        let root = RootValue::new([0xAB; ROOT_BYTES]);
        assert_eq!(root.to_string().len(), 39);
    }

    #[test]
    fn round_trips_through_base32() {
        let root = RootValue::new([0x42; ROOT_BYTES]);
        let parsed: RootValue = root.to_string().parse().unwrap();
        assert_eq!(root, parsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-base32!!".parse::<RootValue>().is_err());
    }
}
