//! Object identifiers: 32-byte content hashes naming every stored object.

use data_encoding::HEXLOWER;
use thiserror::Error;

pub const OID_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OidError {
    #[error("invalid object id length: {0} (expected {OID_LEN})")]
    InvalidLength(usize),
    #[error("invalid hex in object id: {0}")]
    InvalidHex(String),
}

/// A 32-byte content hash naming a [`crate::codec::ObjectType`] object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    pub const fn from_bytes(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Parses the canonical lowercase 64-character hex form.
    pub fn parse(s: &str) -> Result<Self, OidError> {
        if s.len() != OID_LEN * 2 {
            return Err(OidError::InvalidLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OidError::InvalidHex(s.to_string()));
        }
        let mut out = [0u8; OID_LEN];
        HEXLOWER
            .decode_mut(s.as_bytes(), &mut out)
            .map_err(|e| OidError::InvalidHex(e.to_string()))?;
        Ok(Self(out))
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    /// The two-hex-digit bucket prefix used for `blobs/XX/<hex>` addressing
    /// (see `spec.md` §4.4's open ambiguity, resolved in SPEC_FULL.md §C.5).
    pub fn bucket(&self) -> String {
        HEXLOWER.encode(&self.0[..1])
    }

    /// Backend-relative path for this object's blob.
    pub fn blob_path(&self) -> String {
        format!("blobs/{}/{}", self.bucket(), self.to_hex())
    }
}

impl From<[u8; OID_LEN]> for Oid {
    fn from(value: [u8; OID_LEN]) -> Self {
        Self(value)
    }
}

impl From<Oid> for [u8; OID_LEN] {
    fn from(value: Oid) -> Self {
        value.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl std::str::FromStr for Oid {
    type Err = OidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_hex() {
        let bytes: [u8; OID_LEN] = core::array::from_fn(|i| i as u8);
        let oid = Oid::from_bytes(bytes);
        let hex = oid.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Oid::parse(&hex).unwrap(), oid);
    }

    #[test]
    fn rejects_bad_length() {
        assert_eq!(Oid::parse("abcd"), Err(OidError::InvalidLength(4)));
    }

    #[test]
    fn rejects_non_hex() {
        let s = "g".repeat(64);
        assert!(matches!(Oid::parse(&s), Err(OidError::InvalidHex(_))));
    }

    #[test]
    fn blob_path_uses_two_hex_digit_bucket() {
        let mut bytes = [0u8; OID_LEN];
        bytes[0] = 0xab;
        let oid = Oid::from_bytes(bytes);
        assert!(oid.blob_path().starts_with("blobs/ab/"));
    }

    #[test]
    fn equality_and_hash_are_byte_wise() {
        use std::collections::HashSet;
        let a = Oid::from_bytes([1u8; OID_LEN]);
        let b = Oid::from_bytes([1u8; OID_LEN]);
        let c = Oid::from_bytes([2u8; OID_LEN]);
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }
}
