//! Call metadata.
//!
//! Headers and trailers are ordered lists of key/value pairs. Values are
//! either ASCII strings or raw bytes; binary entries use keys ending in
//! [`BINARY_SUFFIX`], following the gRPC convention.

use bytes::Bytes;

use crate::error::FrameError;

/// Key suffix marking a binary metadata entry.
pub const BINARY_SUFFIX: &str = "-bin";

/// A single metadata value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    /// Printable ASCII value.
    Ascii(String),
    /// Arbitrary bytes (key must end in `-bin`).
    Binary(Bytes),
}

impl MetadataValue {
    /// Get the value as a string, if it is an ASCII value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Ascii(s) => Some(s),
            MetadataValue::Binary(_) => None,
        }
    }

    /// Get the raw bytes of the value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MetadataValue::Ascii(s) => s.as_bytes(),
            MetadataValue::Binary(b) => b,
        }
    }

    /// Whether this is a binary value.
    pub fn is_binary(&self) -> bool {
        matches!(self, MetadataValue::Binary(_))
    }
}

/// Ordered multi-map of call metadata.
///
/// Keys are normalized to lower case. A key may appear more than once.
///
/// # Example
///
/// ```
/// use piperpc_core::Metadata;
///
/// let mut metadata = Metadata::new();
/// metadata.insert("x-request-id", "abc-123").unwrap();
/// metadata.insert_bin("trace-bin", vec![1, 2, 3]).unwrap();
///
/// assert_eq!(metadata.get("X-Request-Id"), Some("abc-123"));
/// assert_eq!(metadata.get_bytes("trace-bin"), Some(&[1u8, 2, 3][..]));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an ASCII entry.
    ///
    /// Fails if the key is empty, uses the binary suffix, or the value is
    /// not printable ASCII.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Result<(), FrameError>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let key = normalize_key(key.as_ref())?;
        if key.ends_with(BINARY_SUFFIX) {
            return Err(FrameError::InvalidMetadata(format!(
                "ascii value under binary key {key:?}"
            )));
        }
        let value = value.into();
        if !value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
            return Err(FrameError::InvalidMetadata(format!(
                "non-printable value for key {key:?}"
            )));
        }
        self.entries.push((key, MetadataValue::Ascii(value)));
        Ok(())
    }

    /// Insert a binary entry. The key must end in `-bin`.
    pub fn insert_bin<K, V>(&mut self, key: K, value: V) -> Result<(), FrameError>
    where
        K: AsRef<str>,
        V: Into<Bytes>,
    {
        let key = normalize_key(key.as_ref())?;
        if !key.ends_with(BINARY_SUFFIX) {
            return Err(FrameError::InvalidMetadata(format!(
                "binary value under non-binary key {key:?}"
            )));
        }
        self.entries.push((key, MetadataValue::Binary(value.into())));
        Ok(())
    }

    /// Insert an already-typed entry, checking the key/value kind rule.
    pub fn append(&mut self, key: &str, value: MetadataValue) -> Result<(), FrameError> {
        match value {
            MetadataValue::Ascii(s) => self.insert(key, s),
            MetadataValue::Binary(b) => self.insert_bin(key, b),
        }
    }

    /// Get the first ASCII value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_value(key).and_then(MetadataValue::as_str)
    }

    /// Get the first value for a key as bytes.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get_value(key).map(MetadataValue::as_bytes)
    }

    /// Get the first value for a key.
    pub fn get_value(&self, key: &str) -> Option<&MetadataValue> {
        self.get_all(key).next()
    }

    /// Get all values for a key (for keys that appear multiple times).
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a MetadataValue> + use<'a> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Check if a key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn normalize_key(key: &str) -> Result<String, FrameError> {
    if key.is_empty() {
        return Err(FrameError::InvalidMetadata("empty key".into()));
    }
    let valid = key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !valid {
        return Err(FrameError::InvalidMetadata(format!("invalid key {key:?}")));
    }
    Ok(key.to_ascii_lowercase())
}
