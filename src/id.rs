//! Object identity.
//!
//! An [`ObjectId`] is the triple `(store, entity, reference key)`. IDs minted
//! by a context for freshly inserted objects carry no store and a random
//! reference key; they are *temporary* until a store hands out a permanent
//! replacement at save time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

/// Scheme of the URI form of an object ID.
pub const URI_SCHEME: &str = "x-objgraph";

/// Permanent identity of a persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Creates a new random store ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a store ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true for the all-zero UUID, which never names a real store.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StoreId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Store-assigned key of a record, unique per store and entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceKey {
    Integer(i64),
    Text(String),
}

impl ReferenceKey {
    /// Marks a text key in the URI form, so `~12` stays text while `12` is an
    /// integer.
    const TEXT_MARKER: char = '~';

    /// Encodes the key as one URI path segment.
    ///
    /// Integers are written as decimal digits. Text is written after a `~`
    /// with every byte outside `[A-Za-z0-9._-]` percent-escaped.
    #[must_use]
    pub fn to_segment(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Text(v) => {
                let mut out = String::with_capacity(v.len() + 1);
                out.push(Self::TEXT_MARKER);
                for byte in v.bytes() {
                    if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
                        out.push(char::from(byte));
                    } else {
                        out.push_str(&format!("%{byte:02X}"));
                    }
                }
                out
            }
        }
    }

    /// Decodes a segment written by [`ReferenceKey::to_segment`].
    pub fn from_segment(segment: &str) -> Result<Self, String> {
        let Some(escaped) = segment.strip_prefix(Self::TEXT_MARKER) else {
            return segment
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|_| format!("reference key `{segment}` is neither an integer nor `~`-prefixed text"));
        };

        let mut bytes = Vec::with_capacity(escaped.len());
        let mut rest = escaped.as_bytes();
        while let Some((&byte, tail)) = rest.split_first() {
            if byte == b'%' {
                let hex = tail
                    .get(..2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| format!("bad escape in reference key `{segment}`"))?;
                bytes.push(hex);
                rest = &tail[2..];
            } else {
                bytes.push(byte);
                rest = tail;
            }
        }
        String::from_utf8(bytes)
            .map(Self::Text)
            .map_err(|_| format!("reference key `{segment}` is not UTF-8"))
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_segment())
    }
}

impl FromStr for ReferenceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_segment(s)
    }
}

impl From<i64> for ReferenceKey {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for ReferenceKey {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&str> for ReferenceKey {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ReferenceKey {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Global identity of a managed object.
///
/// Equality is structural on the whole triple, so two stores never share an
/// ID even when they hand out the same reference key.
///
/// # Examples
///
/// ```
/// use objgraph::{ObjectId, StoreId};
///
/// let temp = ObjectId::new_temporary("Employee");
/// assert!(temp.is_temporary());
///
/// let store = StoreId::new();
/// let id = ObjectId::new_permanent(store, "Employee", 7);
/// assert!(!id.is_temporary());
/// assert_eq!(id.to_uri(), format!("x-objgraph://{store}/Employee/7"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    store: Option<StoreId>,
    entity: String,
    key: ReferenceKey,
}

impl ObjectId {
    /// Mints a temporary ID for a newly inserted object.
    #[must_use]
    pub fn new_temporary(entity: impl Into<String>) -> Self {
        Self {
            store: None,
            entity: entity.into(),
            key: ReferenceKey::Text(Uuid::new_v4().to_string()),
        }
    }

    /// Builds a permanent ID for a record held by `store`.
    #[must_use]
    pub fn new_permanent(
        store: StoreId,
        entity: impl Into<String>,
        key: impl Into<ReferenceKey>,
    ) -> Self {
        Self {
            store: Some(store),
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// The owning store, `None` while temporary.
    #[must_use]
    pub const fn store(&self) -> Option<StoreId> {
        self.store
    }

    /// Name of the entity this object is an instance of.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub const fn key(&self) -> &ReferenceKey {
        &self.key
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.store.is_none()
    }

    /// Encodes this ID as `x-objgraph://<store>/<entity>/<key>`; see
    /// [`ReferenceKey::to_segment`] for the key.
    ///
    /// Temporary IDs encode with an empty authority, which [`ObjectId::parse_uri`]
    /// rejects.
    #[must_use]
    pub fn to_uri(&self) -> String {
        let authority = self.store.map(|s| s.to_string()).unwrap_or_default();
        format!("{URI_SCHEME}://{authority}/{}/{}", self.entity, self.key.to_segment())
    }

    /// Parses the URI form without checking the store or entity exist.
    ///
    /// Use [`crate::StoreCoordinator::object_id_from_uri`] to also validate
    /// against a coordinator.
    pub fn parse_uri(uri: &str) -> Result<Self, IdError> {
        let malformed = |reason: &str| IdError::MalformedId {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| malformed("unexpected scheme"))?;

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.trim().is_empty() {
            return Err(IdError::TemporaryId {
                uri: uri.to_string(),
            });
        }

        let (entity, key_segment) = path
            .split_once('/')
            .filter(|(entity, key)| !entity.is_empty() && !key.is_empty())
            .ok_or_else(|| malformed("expected /<entity>/<reference-key>"))?;
        if key_segment.contains('/') {
            return Err(malformed("reference key spans more than one segment"));
        }

        let store = Uuid::parse_str(authority)
            .map(StoreId::from)
            .map_err(|_| malformed("store identity is not a UUID"))?;
        let key = ReferenceKey::from_segment(key_segment).map_err(|reason| malformed(&reason))?;

        Ok(Self::new_permanent(store, entity, key))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.store {
            Some(_) => write!(f, "{}", self.to_uri()),
            None => write!(f, "temp:{}/{}", self.entity, self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids_are_unique() {
        let a = ObjectId::new_temporary("Book");
        let b = ObjectId::new_temporary("Book");
        assert!(a.is_temporary());
        assert_ne!(a, b);
        assert_eq!(a.entity(), "Book");
    }

    #[test]
    fn test_same_key_different_store_not_equal() {
        let a = ObjectId::new_permanent(StoreId::new(), "Book", 1);
        let b = ObjectId::new_permanent(StoreId::new(), "Book", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_uri_round_trip() {
        let id = ObjectId::new_permanent(StoreId::new(), "Company", 42);
        let parsed = ObjectId::parse_uri(&id.to_uri()).unwrap();
        assert_eq!(parsed, id);

        let text = ObjectId::new_permanent(StoreId::new(), "Company", "acme");
        assert_eq!(ObjectId::parse_uri(&text.to_uri()).unwrap(), text);
    }

    #[test]
    fn test_blank_authority_is_temporary_error() {
        let uri = ObjectId::new_temporary("Book").to_uri();
        let err = ObjectId::parse_uri(&uri).unwrap_err();
        assert!(matches!(err, IdError::TemporaryId { .. }));

        let err = ObjectId::parse_uri("x-objgraph://   /Book/1").unwrap_err();
        assert!(matches!(err, IdError::TemporaryId { .. }));
    }

    #[test]
    fn test_missing_path_segment_is_malformed() {
        let store = StoreId::new();
        let err = ObjectId::parse_uri(&format!("x-objgraph://{store}/Book")).unwrap_err();
        assert!(matches!(err, IdError::MalformedId { .. }));

        let err = ObjectId::parse_uri(&format!("x-objgraph://{store}")).unwrap_err();
        assert!(matches!(err, IdError::MalformedId { .. }));
    }

    #[test]
    fn test_wrong_scheme_is_malformed() {
        let err = ObjectId::parse_uri("http://example.com/Book/1").unwrap_err();
        assert!(matches!(err, IdError::MalformedId { .. }));
    }

    #[test]
    fn test_reference_key_parsing() {
        assert_eq!("12".parse::<ReferenceKey>().unwrap(), ReferenceKey::Integer(12));
        assert_eq!(
            "~abc".parse::<ReferenceKey>().unwrap(),
            ReferenceKey::Text("abc".to_string())
        );
        assert!("abc".parse::<ReferenceKey>().is_err());
        assert!("~a%2".parse::<ReferenceKey>().is_err());
        assert!("~%FF".parse::<ReferenceKey>().is_err());
    }

    #[test]
    fn test_text_keys_keep_identity_through_uri() {
        let store = StoreId::new();
        for key in ["12", "007", "-3", "a//b", "", "~x", "50%", "caf\u{e9} bar", "/"] {
            let id = ObjectId::new_permanent(store, "Company", key);
            let parsed = ObjectId::parse_uri(&id.to_uri()).unwrap();
            assert_eq!(parsed, id, "key {key:?}");
            assert_eq!(parsed.key(), &ReferenceKey::Text(key.to_string()));
        }
    }

    #[test]
    fn test_extra_path_segment_is_malformed() {
        let store = StoreId::new();
        let err = ObjectId::parse_uri(&format!("x-objgraph://{store}/Book/1/2")).unwrap_err();
        assert!(matches!(err, IdError::MalformedId { .. }));
        let err = ObjectId::parse_uri(&format!("x-objgraph://{store}//1")).unwrap_err();
        assert!(matches!(err, IdError::MalformedId { .. }));
    }
}
