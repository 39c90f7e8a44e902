//! Strong type definitions for hypersync.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// URI scheme of resource identifiers.
pub const IRI_SCHEME: &str = "hm://";

/// An opaque content identifier, usually a content hash.
///
/// Ids are compared bytewise, which is the secondary sort key of an
/// [`Item`](crate::Item).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobId(Bytes);

impl BlobId {
    /// Longest id the wire format carries.
    pub const MAX_LEN: usize = 64;

    /// Create an id from raw bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Create an id from a static byte string.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Content-address some data with Blake3.
    pub fn digest(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(blake3::hash(data).as_bytes()))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the underlying shared buffer.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the id has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the id is non-empty and at most [`MAX_LEN`](Self::MAX_LEN) bytes.
    pub fn is_valid(&self) -> bool {
        !self.is_empty() && self.len() <= Self::MAX_LEN
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        Ok(Self(Bytes::from(bytes)))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlobId({})", &hex[..hex.len().min(16)])
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for BlobId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&'static [u8]> for BlobId {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_static(bytes)
    }
}

impl From<Vec<u8>> for BlobId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

/// String newtype boilerplate shared by the identifier types.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the string form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a space: the top-level namespace of resources.
    SpaceId
);

string_id!(
    /// Identifier of an account (a signing identity).
    AccountId
);

string_id!(
    /// Identifier of a network peer.
    PeerId
);

impl From<&AccountId> for SpaceId {
    fn from(account: &AccountId) -> Self {
        // Every account owns the space named after it.
        Self(account.0.clone())
    }
}

/// A resource version. The empty version means "latest".
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// The "latest" version.
    pub const fn latest() -> Self {
        Self(String::new())
    }

    /// Wrap a version string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Whether this is the "latest" version.
    pub fn is_latest(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_latest() {
            f.write_str("Version(latest)")
        } else {
            write!(f, "Version({})", self.0)
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A resource identifier of the form `hm://<space>/<path>`.
///
/// Trailing slashes are stripped on parse, so `hm://alice/` and
/// `hm://alice` name the same resource.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iri(String);

impl Iri {
    /// Parse and normalize a resource identifier.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim_end_matches('/');
        let rest = trimmed
            .strip_prefix(IRI_SCHEME)
            .ok_or_else(|| CoreError::InvalidIri(format!("missing {} scheme: {}", IRI_SCHEME, s)))?;
        let space = rest.split('/').next().unwrap_or_default();
        if space.is_empty() {
            return Err(CoreError::InvalidIri(format!("empty space: {}", s)));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrow the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The space this resource belongs to.
    pub fn space(&self) -> SpaceId {
        let rest = &self.0[IRI_SCHEME.len()..];
        SpaceId(rest.split('/').next().unwrap_or_default().to_owned())
    }

    /// The path within the space, with a leading `/`, or empty for the
    /// space root.
    pub fn path(&self) -> &str {
        let rest = &self.0[IRI_SCHEME.len()..];
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => "",
        }
    }

    /// Split into `(space, path)`.
    pub fn space_path(&self) -> (SpaceId, &str) {
        (self.space(), self.path())
    }

    /// Whether this resource is `scope` itself, or a descendant of it when
    /// `recursive` is set.
    pub fn is_within(&self, scope: &Iri, recursive: bool) -> bool {
        if self.0 == scope.0 {
            return true;
        }
        recursive
            && self.0.len() > scope.0.len()
            && self.0.starts_with(&scope.0)
            && self.0.as_bytes()[scope.0.len()] == b'/'
    }
}

impl fmt::Debug for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iri({})", self.0)
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Iri {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Iri> for String {
    fn from(iri: Iri) -> Self {
        iri.0
    }
}

impl std::str::FromStr for Iri {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Identifies one schedulable unit of discovery work.
///
/// Two keys differing only in `recursive` are distinct tasks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscoveryKey {
    /// The resource to discover.
    pub iri: Iri,
    /// Specific version, or latest.
    pub version: Version,
    /// Whether child resources are included.
    pub recursive: bool,
}

impl DiscoveryKey {
    /// Key for the latest version of a resource.
    pub fn latest(iri: Iri, recursive: bool) -> Self {
        Self {
            iri,
            version: Version::latest(),
            recursive,
        }
    }

    /// Whether `resource` falls inside this key's scope.
    pub fn covers(&self, resource: &Iri) -> bool {
        resource.is_within(&self.iri, self.recursive)
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iri)?;
        if !self.version.is_latest() {
            write!(f, "?v={}", self.version)?;
        }
        if self.recursive {
            f.write_str(" (recursive)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_hex_roundtrip() {
        let id = BlobId::from_bytes(vec![0x42; 32]);
        let recovered = BlobId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_blob_id_debug_is_short() {
        let id = BlobId::from_bytes(vec![0xcd; 32]);
        assert_eq!(format!("{:?}", id), "BlobId(cdcdcdcdcdcdcdcd)");
        let short = BlobId::from_static(b"a");
        assert_eq!(format!("{:?}", short), "BlobId(61)");
    }

    #[test]
    fn test_blob_id_orders_bytewise() {
        assert!(BlobId::from_static(b"a") < BlobId::from_static(b"ab"));
        assert!(BlobId::from_static(b"ab") < BlobId::from_static(b"b"));
    }

    #[test]
    fn test_iri_trims_trailing_slash() {
        let iri = Iri::parse("hm://alice/docs/").unwrap();
        assert_eq!(iri.as_str(), "hm://alice/docs");
        assert_eq!(Iri::parse("hm://alice/").unwrap().as_str(), "hm://alice");
    }

    #[test]
    fn test_iri_rejects_garbage() {
        assert!(Iri::parse("http://alice").is_err());
        assert!(Iri::parse("hm://").is_err());
        assert!(Iri::parse("hm:///foo").is_err());
    }

    #[test]
    fn test_iri_space_path() {
        let iri = Iri::parse("hm://alice/docs/readme").unwrap();
        let (space, path) = iri.space_path();
        assert_eq!(space, SpaceId::new("alice"));
        assert_eq!(path, "/docs/readme");

        let root = Iri::parse("hm://alice").unwrap();
        assert_eq!(root.path(), "");
    }

    #[test]
    fn test_iri_is_within() {
        let scope = Iri::parse("hm://alice/docs").unwrap();
        let child = Iri::parse("hm://alice/docs/a").unwrap();
        let sibling = Iri::parse("hm://alice/docsx").unwrap();

        assert!(scope.is_within(&scope, false));
        assert!(!child.is_within(&scope, false));
        assert!(child.is_within(&scope, true));
        assert!(!sibling.is_within(&scope, true));
    }

    #[test]
    fn test_iri_serde_normalizes() {
        let iri: Iri = serde_json::from_str("\"hm://bob/x/\"").unwrap();
        assert_eq!(iri.as_str(), "hm://bob/x");
        assert!(serde_json::from_str::<Iri>("\"bob\"").is_err());
    }

    #[test]
    fn test_discovery_keys_differ_by_recursion() {
        let iri = Iri::parse("hm://alice").unwrap();
        assert_ne!(
            DiscoveryKey::latest(iri.clone(), false),
            DiscoveryKey::latest(iri, true)
        );
    }
}
