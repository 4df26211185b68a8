// App-owned asset storage inside a document package.
//
// assets/originals/<id>.<ext>   captured source files
// assets/edited/<id>.<ext>      rendered artifacts (+ transform sidecars)

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tessera_common::error::{PipelineError, Result};
use tessera_common::types::AssetId;
use tracing::{debug, info};

use super::atomic::{is_temp_name, AtomicWriter, StagedWrite};
use super::sidecar::SidecarStore;

const ORIGINALS_DIR: &str = "originals";
const EDITED_DIR: &str = "edited";
const MAX_EXT_CHARS: usize = 8;

/// Which half of the managed store a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Original,
    Edited,
}

impl AssetKind {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Original => ORIGINALS_DIR,
            Self::Edited => EDITED_DIR,
        }
    }
}

/// A file found in the managed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedEntry {
    pub id: AssetId,
    pub kind: AssetKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ManagedStore {
    root: PathBuf,
    writer: AtomicWriter,
}

impl ManagedStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in [AssetKind::Original, AssetKind::Edited] {
            let dir = root.join(kind.dir_name());
            fs::create_dir_all(&dir).map_err(|error| {
                PipelineError::io(format!("failed to create `{}`", dir.display()), error)
            })?;
        }
        Ok(Self { root, writer: AtomicWriter::new() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: AssetKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn path_for(&self, kind: AssetKind, id: &AssetId, ext: &str) -> Result<PathBuf> {
        let ext = sanitize_ext(ext)?;
        Ok(self.dir(kind).join(format!("{id}.{ext}")))
    }

    /// Copy `bytes` into the originals area under a fresh identifier.
    pub fn import_original(&self, bytes: &[u8], ext: &str) -> Result<AssetId> {
        let id = AssetId::generate();
        let dest = self.path_for(AssetKind::Original, &id, ext)?;
        self.writer.write(bytes, &dest)?;
        info!(id = %id, bytes = bytes.len(), "captured original into managed store");
        Ok(id)
    }

    /// Stage a new edited artifact under a fresh identifier.
    pub fn stage_edited(&self, bytes: &[u8], ext: &str) -> Result<(AssetId, StagedWrite)> {
        let id = AssetId::generate();
        let dest = self.path_for(AssetKind::Edited, &id, ext)?;
        let staged = self.writer.stage(bytes, &dest)?;
        Ok((id, staged))
    }

    /// Find the file stored for `id`, whatever its extension.
    pub fn locate(&self, kind: AssetKind, id: &AssetId) -> Result<Option<PathBuf>> {
        Ok(self.list(kind)?.into_iter().find(|entry| &entry.id == id).map(|entry| entry.path))
    }

    /// Every `<id>.<ext>` file of `kind`. Temp files, sidecars and anything
    /// not shaped like a managed file are skipped.
    pub fn list(&self, kind: AssetKind) -> Result<Vec<ManagedEntry>> {
        let dir = self.dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(PipelineError::io(format!("failed to list `{}`", dir.display()), error))
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| {
                PipelineError::io(format!("failed to read entry in `{}`", dir.display()), error)
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_temp_name(name) || SidecarStore::is_sidecar_name(name) {
                continue;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some((stem, ext)) = name.split_once('.') else {
                continue;
            };
            if ext.contains('.') || sanitize_ext(ext).is_err() {
                continue;
            }
            let Ok(id) = AssetId::parse(stem) else {
                continue;
            };
            found.push(ManagedEntry { id, kind, path: entry.path() });
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    pub fn list_originals(&self) -> Result<Vec<ManagedEntry>> {
        self.list(AssetKind::Original)
    }

    /// Delete the stored file for `id`; edited artifacts lose their sidecar
    /// too. Returns whether anything was removed.
    pub fn remove(&self, kind: AssetKind, id: &AssetId) -> Result<bool> {
        let Some(entry) = self.list(kind)?.into_iter().find(|entry| &entry.id == id) else {
            return Ok(false);
        };
        self.remove_entry(&entry)?;
        Ok(true)
    }

    /// Delete a listed entry (and its sidecar, for edited artifacts).
    pub fn remove_entry(&self, entry: &ManagedEntry) -> Result<()> {
        remove_file_if_present(&entry.path)?;
        if entry.kind == AssetKind::Edited {
            SidecarStore::default().remove(&entry.path)?;
        }
        debug!(id = %entry.id, kind = ?entry.kind, path = %entry.path.display(), "removed managed file");
        Ok(())
    }

    pub fn remove_original(&self, id: &AssetId) -> Result<bool> {
        self.remove(AssetKind::Original, id)
    }
}

/// Lower-cased extension limited to ASCII alphanumerics.
pub fn sanitize_ext(ext: &str) -> Result<String> {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXT_CHARS
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(ext)
    } else {
        Err(PipelineError::io(
            format!("unsupported file extension `{ext}`"),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        ))
    }
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => {
            Err(PipelineError::io(format!("failed to remove `{}`", path.display()), error))
        }
    }
}
