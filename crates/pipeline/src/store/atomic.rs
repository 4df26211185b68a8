// Crash-safe file replacement: temp file in the destination directory, fsync,
// then rename over the destination.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tessera_common::error::{PipelineError, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::security::{ensure_owner_only_file, open_create_new};

const TEMP_MARKER: &str = ".tmp.";

/// Writes whole files so that readers only ever see the old or the new bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicWriter {
    private: bool,
}

impl AtomicWriter {
    pub fn new() -> Self {
        Self { private: false }
    }

    /// Writer whose output files are owner-only (0600).
    pub fn private() -> Self {
        Self { private: true }
    }

    /// Replace `dest` with `bytes`.
    pub fn write(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        self.stage(bytes, dest)?.commit().map(|_| ())
    }

    /// Write `bytes` to a fresh temp file next to `dest` without publishing.
    ///
    /// If staging fails `dest` is untouched and the partial temp file is
    /// removed. A staged write that is dropped without `commit` is discarded.
    pub fn stage(&self, bytes: &[u8], dest: &Path) -> Result<StagedWrite> {
        let parent = parent_dir(dest)?;
        fs::create_dir_all(parent).map_err(|error| {
            PipelineError::io(format!("failed to create directory `{}`", parent.display()), error)
        })?;

        let temp = temp_path_for(dest)?;
        if let Err(error) = write_synced(&temp, bytes, self.private) {
            let _ = fs::remove_file(&temp);
            return Err(PipelineError::io(
                format!("failed to write temp file `{}`", temp.display()),
                error,
            ));
        }
        if self.private {
            if let Err(error) = ensure_owner_only_file(&temp) {
                warn!(?error, path = %temp.display(), "failed to tighten temp file mode");
            }
        }

        debug!(temp = %temp.display(), dest = %dest.display(), bytes = bytes.len(), "staged write");
        Ok(StagedWrite { temp, dest: dest.to_path_buf(), state: StageState::Pending })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageState {
    Pending,
    Committed,
    /// The rename failed; the temp file is left for the caller.
    Abandoned,
}

/// A fully written temp file waiting to be renamed onto its destination.
#[derive(Debug)]
pub struct StagedWrite {
    temp: PathBuf,
    dest: PathBuf,
    state: StageState,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest
    }

    /// Atomically move the temp file onto the destination.
    ///
    /// On failure the error propagates and the temp file is not removed.
    pub fn commit(mut self) -> Result<PathBuf> {
        if let Err(error) = fs::rename(&self.temp, &self.dest) {
            self.state = StageState::Abandoned;
            return Err(PipelineError::io(
                format!(
                    "failed to atomically move `{}` to `{}`",
                    self.temp.display(),
                    self.dest.display()
                ),
                error,
            ));
        }
        self.state = StageState::Committed;

        if let Some(parent) = self.dest.parent() {
            fsync_dir(parent);
        }
        Ok(self.dest.clone())
    }

    /// Discard the staged bytes.
    pub fn abort(self) {
        drop(self);
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if self.state == StageState::Pending {
            if let Err(error) = fs::remove_file(&self.temp) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %error, path = %self.temp.display(), "failed to discard staged write");
                }
            }
        }
    }
}

/// Commit several staged writes in order. Stops at the first failure; writes
/// not yet committed are discarded.
pub fn commit_all(staged: Vec<StagedWrite>) -> Result<Vec<PathBuf>> {
    let mut committed = Vec::with_capacity(staged.len());
    for write in staged {
        committed.push(write.commit()?);
    }
    Ok(committed)
}

/// True if `name` looks like a temp file produced by [`AtomicWriter`].
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

fn parent_dir(dest: &Path) -> Result<&Path> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent),
        Some(_) => Ok(Path::new(".")),
        None => Err(PipelineError::io(
            format!("`{}` has no parent directory", dest.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )),
    }
}

fn temp_path_for(dest: &Path) -> Result<PathBuf> {
    let name = dest.file_name().ok_or_else(|| {
        PipelineError::io(
            format!("`{}` has no file name", dest.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })?;
    let temp_name =
        format!(".{}{}{}", name.to_string_lossy(), TEMP_MARKER, Uuid::new_v4().simple());
    Ok(parent_dir(dest)?.join(temp_name))
}

fn write_synced(path: &Path, bytes: &[u8], private: bool) -> std::io::Result<()> {
    let mut file = open_create_new(path, private)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn fsync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .expect("dir should be readable")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| is_temp_name(name))
            .collect()
    }

    #[test]
    fn writes_new_file() {
        let tmp = tempdir().expect("tempdir should be created");
        let dest = tmp.path().join("out.png");

        AtomicWriter::new().write(b"pixels", &dest).expect("write should succeed");

        assert_eq!(fs::read(&dest).expect("dest should exist"), b"pixels");
        assert!(temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn replaces_existing_content() {
        let tmp = tempdir().expect("tempdir should be created");
        let dest = tmp.path().join("out.png");
        fs::write(&dest, b"old").expect("seed should be written");

        AtomicWriter::new().write(b"brand new bytes", &dest).expect("write should succeed");

        assert_eq!(fs::read(&dest).expect("dest should exist"), b"brand new bytes");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let tmp = tempdir().expect("tempdir should be created");
        let dest = tmp.path().join("a").join("b").join("out.json");

        AtomicWriter::new().write(b"{}", &dest).expect("write should succeed");
        assert!(dest.exists());
    }

    #[test]
    fn staged_write_is_invisible_until_commit() {
        let tmp = tempdir().expect("tempdir should be created");
        let dest = tmp.path().join("out.png");
        fs::write(&dest, b"prior").expect("seed should be written");

        let staged = AtomicWriter::new().stage(b"next", &dest).expect("stage should succeed");
        assert_eq!(fs::read(&dest).unwrap(), b"prior");
        assert!(staged.temp_path().starts_with(tmp.path()));

        staged.commit().expect("commit should succeed");
        assert_eq!(fs::read(&dest).unwrap(), b"next");
    }

    #[test]
    fn dropped_stage_leaves_destination_and_no_temp() {
        let tmp = tempdir().expect("tempdir should be created");
        let dest = tmp.path().join("out.png");
        fs::write(&dest, b"prior").expect("seed should be written");

        let staged = AtomicWriter::new().stage(b"never published", &dest).unwrap();
        staged.abort();

        assert_eq!(fs::read(&dest).unwrap(), b"prior");
        assert!(temp_files(tmp.path()).is_empty());
    }

    #[test]
    fn failed_rename_propagates_and_keeps_temp() {
        let tmp = tempdir().expect("tempdir should be created");
        // A non-empty directory at the destination makes the rename fail.
        let dest = tmp.path().join("occupied");
        fs::create_dir_all(dest.join("child")).unwrap();

        let staged = AtomicWriter::new().stage(b"bytes", &dest).unwrap();
        let temp = staged.temp_path().to_path_buf();
        let error = staged.commit().expect_err("rename onto a directory should fail");

        assert!(matches!(error, PipelineError::IoFailure { .. }));
        assert!(dest.is_dir());
        assert!(temp.exists(), "temp cleanup is left to the caller");
    }

    #[test]
    fn commit_all_publishes_in_order() {
        let tmp = tempdir().expect("tempdir should be created");
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("a.png.transform.json");
        let writer = AtomicWriter::new();

        let staged = vec![writer.stage(b"A", &a).unwrap(), writer.stage(b"B", &b).unwrap()];
        let paths = commit_all(staged).expect("commit should succeed");

        assert_eq!(paths, vec![a.clone(), b.clone()]);
        assert_eq!(fs::read(a).unwrap(), b"A");
        assert_eq!(fs::read(b).unwrap(), b"B");
    }

    #[cfg(unix)]
    #[test]
    fn private_writer_produces_owner_only_files() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().expect("tempdir should be created");
        let dest = tmp.path().join("tokens.json");
        AtomicWriter::private().write(b"{}", &dest).unwrap();

        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn temp_names_are_recognized() {
        assert!(is_temp_name(".abc.png.tmp.0123"));
        assert!(!is_temp_name("abc.png"));
        assert!(!is_temp_name(".hidden"));
    }
}
