// Managed identifier canonicalization (NFKC, charset, 128 char max) and
// token-table key derivation for absolute paths.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed identifier length in characters.
const MAX_ID_CHARS: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier exceeds maximum length of {MAX_ID_CHARS} characters")]
    TooLong,

    #[error("identifier contains a path separator")]
    Separator,

    #[error("identifier contains directory traversal component: {0}")]
    Traversal(String),

    #[error("identifier contains null byte")]
    NullByte,

    #[error("identifier contains invalid character: {0:?}")]
    InvalidChar(char),

    #[error("token key path must be absolute: {0}")]
    RelativePath(String),
}

/// Normalize a managed-storage identifier so it can be used as a file stem.
///
/// Rules:
/// - Apply Unicode NFKC normalization and trim surrounding whitespace
/// - Reject empty identifiers, null bytes and either path separator
/// - Reject `.` and `..` (traversal)
/// - Accept only ASCII alphanumerics, `-` and `_`
/// - Enforce max 128 character limit (after normalization)
pub fn normalize_asset_id(input: &str) -> Result<String, IdentifierError> {
    if input.contains('\0') {
        return Err(IdentifierError::NullByte);
    }

    let normalized: String = input.nfkc().collect();
    let trimmed = normalized.trim();

    if trimmed.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(IdentifierError::Separator);
    }
    if trimmed == "." || trimmed == ".." {
        return Err(IdentifierError::Traversal(trimmed.to_string()));
    }
    if let Some(bad) = trimmed.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(IdentifierError::InvalidChar(bad));
    }
    if trimmed.chars().count() > MAX_ID_CHARS {
        return Err(IdentifierError::TooLong);
    }

    Ok(trimmed.to_string())
}

/// Derive the token-table key for an absolute path.
///
/// `.` components are dropped and `..` is resolved lexically (no filesystem
/// access, so symlinks are not followed). The result is NFC-normalized so the
/// same file picked through different input methods maps to one key.
pub fn token_key(path: &Path) -> Result<String, IdentifierError> {
    if !path.is_absolute() {
        return Err(IdentifierError::RelativePath(path.display().to_string()));
    }

    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    let lossy = cleaned.to_string_lossy();
    if lossy.contains('\0') {
        return Err(IdentifierError::NullByte);
    }
    Ok(lossy.nfc().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Valid identifiers
    #[test]
    fn test_simple_id() {
        assert_eq!(normalize_asset_id("a1b2c3").unwrap(), "a1b2c3");
    }

    #[test]
    fn test_uuid_simple_id() {
        let id = "4f9c2e1d8a7b4c3d9e8f7a6b5c4d3e2f";
        assert_eq!(normalize_asset_id(id).unwrap(), id);
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(normalize_asset_id("  poster_01 ").unwrap(), "poster_01");
    }

    #[test]
    fn test_unicode_nfkc_fullwidth() {
        // NFKC folds fullwidth Latin letters to ASCII.
        assert_eq!(normalize_asset_id("\u{FF21}\u{FF22}").unwrap(), "AB");
    }

    // Rejections
    #[test]
    fn test_reject_empty() {
        assert_eq!(normalize_asset_id(""), Err(IdentifierError::Empty));
        assert_eq!(normalize_asset_id("   "), Err(IdentifierError::Empty));
    }

    #[test]
    fn test_reject_separators() {
        assert_eq!(normalize_asset_id("a/b"), Err(IdentifierError::Separator));
        assert_eq!(normalize_asset_id("a\\b"), Err(IdentifierError::Separator));
    }

    #[test]
    fn test_reject_traversal() {
        assert_eq!(normalize_asset_id(".."), Err(IdentifierError::Traversal("..".to_string())));
    }

    #[test]
    fn test_reject_null_byte() {
        assert_eq!(normalize_asset_id("ab\0"), Err(IdentifierError::NullByte));
    }

    #[test]
    fn test_reject_extension_dot() {
        assert_eq!(normalize_asset_id("a.png"), Err(IdentifierError::InvalidChar('.')));
    }

    #[test]
    fn test_max_length_exactly() {
        assert!(normalize_asset_id(&"a".repeat(128)).is_ok());
        assert_eq!(normalize_asset_id(&"a".repeat(129)), Err(IdentifierError::TooLong));
    }

    // Token keys
    #[test]
    fn test_token_key_requires_absolute() {
        assert!(matches!(
            token_key(Path::new("photos/a.jpg")),
            Err(IdentifierError::RelativePath(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_token_key_resolves_dot_components() {
        let key = token_key(Path::new("/Users/me/./Pictures/../Desktop/a.jpg")).unwrap();
        assert_eq!(key, "/Users/me/Desktop/a.jpg");
    }

    #[cfg(unix)]
    #[test]
    fn test_token_key_composes_unicode() {
        let decomposed = token_key(Path::new("/photos/caf\u{0065}\u{0301}.jpg")).unwrap();
        let composed = token_key(Path::new("/photos/café.jpg")).unwrap();
        assert_eq!(decomposed, composed);
    }
}
