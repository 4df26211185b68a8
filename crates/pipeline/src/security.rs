// Owner-only file modes and the durable key used to seal capability tokens.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use uuid::Uuid;

pub const SEAL_KEY_BYTES: usize = 32;

pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if !path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != 0o600 {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to set owner-only mode on `{}`", path.display()))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if !path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != 0o700 {
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))
                .with_context(|| format!("failed to set owner-only mode on `{}`", path.display()))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

/// Create a brand-new file, failing if anything already exists at `path`.
/// With `private` set the file is created 0600 on unix.
pub fn open_create_new(path: &Path, private: bool) -> std::io::Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = private;
    }
    options.open(path)
}

/// Load the token-sealing key at `path`, creating it on first use.
///
/// The key must survive restarts: tokens sealed in one session are
/// re-validated against it in the next.
pub fn load_or_create_seal_key(path: &Path) -> Result<[u8; SEAL_KEY_BYTES]> {
    if let Ok(value) = std::env::var("TESSERA_SEAL_KEY_BASE64") {
        return decode_key(&value)
            .context("TESSERA_SEAL_KEY_BASE64 must be a base64-no-pad 32-byte key");
    }

    match fs::read_to_string(path) {
        Ok(stored) => {
            return decode_key(&stored)
                .with_context(|| format!("seal key `{}` is invalid", path.display()));
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read seal key `{}`", path.display()));
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create `{}`", parent.display()))?;
        ensure_owner_only_dir(parent)?;
    }

    let key = generate_key();
    let mut file = open_create_new(path, true)
        .with_context(|| format!("failed to create seal key `{}`", path.display()))?;
    file.write_all(encode_key(&key).as_bytes()).context("failed to write seal key")?;
    file.sync_all().context("failed to fsync seal key")?;
    ensure_owner_only_file(path)?;

    Ok(key)
}

pub fn generate_key() -> [u8; SEAL_KEY_BYTES] {
    let mut key = [0u8; SEAL_KEY_BYTES];
    key[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    key[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    key
}

fn encode_key(key: &[u8; SEAL_KEY_BYTES]) -> String {
    STANDARD_NO_PAD.encode(key)
}

fn decode_key(encoded: &str) -> Result<[u8; SEAL_KEY_BYTES]> {
    let bytes =
        STANDARD_NO_PAD.decode(encoded.trim()).context("seal key is not valid base64-no-pad")?;
    if bytes.len() != SEAL_KEY_BYTES {
        bail!("seal key must be {} bytes, got {} bytes", SEAL_KEY_BYTES, bytes.len());
    }

    let mut key = [0u8; SEAL_KEY_BYTES];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_encode_decode_round_trip() {
        let mut key = [0u8; SEAL_KEY_BYTES];
        for (index, byte) in key.iter_mut().enumerate() {
            *byte = u8::try_from(index).expect("index should fit u8");
        }
        let encoded = encode_key(&key);
        let decoded = decode_key(&encoded).expect("decode should succeed");
        assert_eq!(decoded, key);
    }

    #[test]
    fn decode_rejects_short_key() {
        let error = decode_key(&STANDARD_NO_PAD.encode([1u8; 8])).expect_err("short key");
        assert!(error.to_string().contains("32 bytes"));
    }

    #[test]
    fn seal_key_is_created_once_and_reused() {
        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("state").join("seal.key");

        let first = load_or_create_seal_key(&path).expect("key should be created");
        let second = load_or_create_seal_key(&path).expect("key should be reloaded");
        assert_eq!(first, second);
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("exists.bin");
        fs::write(&path, b"x").expect("seed file should be written");

        let error = open_create_new(&path, false).expect_err("existing file should be refused");
        assert_eq!(error.kind(), std::io::ErrorKind::AlreadyExists);
    }

    #[cfg(unix)]
    #[test]
    fn owner_only_helpers_apply_expected_modes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().expect("tempdir should be created");
        let dir_path = tmp.path().join("private-dir");
        let file_path = dir_path.join("private.bin");

        fs::create_dir_all(&dir_path).expect("directory should be created");
        fs::write(&file_path, b"secret").expect("file should be created");

        fs::set_permissions(&dir_path, fs::Permissions::from_mode(0o755))
            .expect("directory permissions should be set");
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644))
            .expect("file permissions should be set");

        ensure_owner_only_dir(&dir_path).expect("directory mode should be tightened");
        ensure_owner_only_file(&file_path).expect("file mode should be tightened");

        let dir_mode =
            fs::metadata(&dir_path).expect("directory metadata should load").permissions().mode()
                & 0o777;
        let file_mode =
            fs::metadata(&file_path).expect("file metadata should load").permissions().mode()
                & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
