// Per-document capability token table.
//
// Tokens are opaque blobs keyed by the normalized absolute path they were
// granted for. The table belongs to one document package; nothing here is
// process-global.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tessera_common::error::Result;
use tessera_common::path::token_key;

const TABLE_VERSION: u32 = 1;

/// An opaque OS-issued credential. Contents are never interpreted outside the
/// access policy that issued it.
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityToken(Vec<u8>);

impl CapabilityToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityToken({} bytes)", self.0.len())
    }
}

impl Serialize for CapabilityToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for CapabilityToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map(Self).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: CapabilityToken,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTable {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, StoredToken>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self { version: TABLE_VERSION, entries: BTreeMap::new(), dirty: false }
    }
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` for `path`, replacing any previous entry.
    pub fn insert(&mut self, path: &Path, token: CapabilityToken) -> Result<String> {
        let key = token_key(path)?;
        self.entries.insert(key.clone(), StoredToken { token, stored_at: Utc::now() });
        self.dirty = true;
        Ok(key)
    }

    pub fn get(&self, path: &Path) -> Option<&StoredToken> {
        let key = token_key(path).ok()?;
        self.entries.get(&key)
    }

    pub fn remove(&mut self, path: &Path) -> Option<StoredToken> {
        let key = token_key(path).ok()?;
        let removed = self.entries.remove(&key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Candidate tokens for `path`, most specific first: the path itself,
    /// then each ancestor directory a grant may have been recorded for.
    pub fn candidates_for(&self, path: &Path) -> Vec<(String, &StoredToken)> {
        path.ancestors()
            .filter_map(|ancestor| {
                let key = token_key(ancestor).ok()?;
                let stored = self.entries.get(&key)?;
                Some((key, stored))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// True when the table changed since it was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn token(byte: u8) -> CapabilityToken {
        CapabilityToken::from_bytes(vec![byte; 4])
    }

    #[cfg(unix)]
    #[test]
    fn insert_and_get_by_normalized_key() {
        let mut table = TokenTable::new();
        table.insert(Path::new("/photos/./trip/a.jpg"), token(1)).unwrap();

        let stored = table.get(Path::new("/photos/trip/a.jpg")).expect("token should be found");
        assert_eq!(stored.token, token(1));
        assert!(table.is_dirty());
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut table = TokenTable::new();
        assert!(table.insert(Path::new("a.jpg"), token(1)).is_err());
        assert!(table.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn candidates_walk_from_file_to_ancestors() {
        let mut table = TokenTable::new();
        table.insert(Path::new("/photos"), token(1)).unwrap();
        table.insert(Path::new("/photos/trip"), token(2)).unwrap();

        let found = table.candidates_for(&PathBuf::from("/photos/trip/a.jpg"));
        let keys: Vec<&str> = found.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["/photos/trip", "/photos"]);
    }

    #[cfg(unix)]
    #[test]
    fn serializes_tokens_as_base64() {
        let mut table = TokenTable::new();
        table.insert(Path::new("/photos/a.jpg"), CapabilityToken::from_bytes(b"abc".to_vec())).unwrap();

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["entries"]["/photos/a.jpg"]["token"], "YWJj");

        let back: TokenTable = serde_json::from_value(json).unwrap();
        assert_eq!(back.get(Path::new("/photos/a.jpg")).unwrap().token.as_bytes(), b"abc");
        assert!(!back.is_dirty());
    }

    #[cfg(unix)]
    #[test]
    fn remove_marks_dirty_only_when_present() {
        let mut table = TokenTable::new();
        table.insert(Path::new("/a.jpg"), token(1)).unwrap();
        table.mark_clean();

        assert!(table.remove(Path::new("/missing.jpg")).is_none());
        assert!(!table.is_dirty());
        assert!(table.remove(Path::new("/a.jpg")).is_some());
        assert!(table.is_dirty());
    }

    #[test]
    fn debug_does_not_leak_token_bytes() {
        assert_eq!(format!("{:?}", token(7)), "CapabilityToken(4 bytes)");
    }
}
