// Transform sidecars stored next to the edited artifact they describe.
//
// `edited/<id>.png` → `edited/<id>.png.transform.json`

use std::fs;
use std::path::{Path, PathBuf};

use tessera_common::aspect::AspectRatio;
use tessera_common::error::{PipelineError, Result};
use tessera_common::types::{SidecarRecord, UserTransform};
use tracing::debug;

use super::atomic::{AtomicWriter, StagedWrite};

const SIDECAR_SUFFIX: &str = ".transform.json";

/// Persists the transform that produced an edited artifact.
///
/// Sidecars are addressed by the edited artifact, not the original: an
/// original may back several slots, while each edited artifact has exactly
/// one producing transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarStore {
    writer: AtomicWriter,
}

impl SidecarStore {
    pub fn new(writer: AtomicWriter) -> Self {
        Self { writer }
    }

    pub fn path_for(artifact: &Path) -> PathBuf {
        let mut name = artifact.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(SIDECAR_SUFFIX);
        artifact.with_file_name(name)
    }

    pub fn is_sidecar_name(name: &str) -> bool {
        name.ends_with(SIDECAR_SUFFIX)
    }

    pub fn save(
        &self,
        transform: UserTransform,
        aspect_override: Option<AspectRatio>,
        artifact: &Path,
    ) -> Result<()> {
        self.stage(transform, aspect_override, artifact)?.commit().map(|_| ())
    }

    /// Encode and stage the sidecar so it can be committed together with the
    /// artifact it describes.
    pub fn stage(
        &self,
        transform: UserTransform,
        aspect_override: Option<AspectRatio>,
        artifact: &Path,
    ) -> Result<StagedWrite> {
        transform.validate()?;
        let record = SidecarRecord { transform, aspect_override };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|error| PipelineError::encode(format!("sidecar encode failed: {error}")))?;
        self.writer.stage(&bytes, &Self::path_for(artifact))
    }

    /// Load the sidecar for `artifact`. `Ok(None)` means no sidecar exists,
    /// which callers treat as the identity transform.
    pub fn load(&self, artifact: &Path) -> Result<Option<SidecarRecord>> {
        let path = Self::path_for(artifact);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(artifact = %artifact.display(), "no sidecar; identity transform applies");
                return Ok(None);
            }
            Err(error) => {
                return Err(PipelineError::io(
                    format!("failed to read sidecar `{}`", path.display()),
                    error,
                ))
            }
        };

        let record: SidecarRecord = serde_json::from_slice(&bytes).map_err(|error| {
            PipelineError::io(
                format!("sidecar `{}` is malformed", path.display()),
                std::io::Error::new(std::io::ErrorKind::InvalidData, error),
            )
        })?;
        Ok(Some(record))
    }

    pub fn load_transform(&self, artifact: &Path) -> Result<Option<UserTransform>> {
        Ok(self.load(artifact)?.map(|record| record.transform))
    }

    /// The transform to resume editing with: the stored one, or identity.
    pub fn effective_transform(&self, artifact: &Path) -> Result<UserTransform> {
        Ok(self.load_transform(artifact)?.unwrap_or(UserTransform::IDENTITY))
    }

    /// Delete the sidecar for `artifact`. Returns whether one existed.
    pub fn remove(&self, artifact: &Path) -> Result<bool> {
        let path = Self::path_for(artifact);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(PipelineError::io(
                format!("failed to remove sidecar `{}`", path.display()),
                error,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sidecar_path_sits_next_to_artifact() {
        let path = SidecarStore::path_for(Path::new("/pkg/assets/edited/abc.png"));
        assert_eq!(path, PathBuf::from("/pkg/assets/edited/abc.png.transform.json"));
        assert!(SidecarStore::is_sidecar_name("abc.png.transform.json"));
    }

    #[test]
    fn save_then_load_returns_identical_transform() {
        let tmp = tempdir().unwrap();
        let artifact = tmp.path().join("edited.png");
        let store = SidecarStore::default();
        let transform = UserTransform::new(1.5, 45.0, 0.1, -0.2);

        store.save(transform, None, &artifact).unwrap();

        assert_eq!(store.load_transform(&artifact).unwrap(), Some(transform));
    }

    #[test]
    fn absent_sidecar_is_distinct_from_default_transform() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("missing.png");
        let present = tmp.path().join("present.png");
        let store = SidecarStore::default();
        store.save(UserTransform::IDENTITY, None, &present).unwrap();

        assert_eq!(store.load(&missing).unwrap(), None);
        assert_eq!(store.load_transform(&present).unwrap(), Some(UserTransform::IDENTITY));
        assert_eq!(store.effective_transform(&missing).unwrap(), UserTransform::IDENTITY);
    }

    #[test]
    fn aspect_override_round_trips() {
        let tmp = tempdir().unwrap();
        let artifact = tmp.path().join("edited.png");
        let store = SidecarStore::default();

        store
            .save(UserTransform::new(2.0, -90.0, 0.0, 0.0), Some(AspectRatio::new(21.0, 9.0)), &artifact)
            .unwrap();

        let record = store.load(&artifact).unwrap().expect("sidecar should exist");
        assert_eq!(record.aspect_override, Some(AspectRatio::new(21.0, 9.0)));
    }

    #[test]
    fn malformed_sidecar_is_io_failure() {
        let tmp = tempdir().unwrap();
        let artifact = tmp.path().join("edited.png");
        fs::write(SidecarStore::path_for(&artifact), b"{not json").unwrap();

        let error = SidecarStore::default().load(&artifact).expect_err("should fail");
        assert!(matches!(error, PipelineError::IoFailure { .. }));
    }

    #[test]
    fn invalid_transform_is_not_written() {
        let tmp = tempdir().unwrap();
        let artifact = tmp.path().join("edited.png");

        let error = SidecarStore::default()
            .save(UserTransform::new(0.0, 0.0, 0.0, 0.0), None, &artifact)
            .expect_err("zero scale should be rejected");
        assert!(matches!(error, PipelineError::InvalidTransform(_)));
        assert!(!SidecarStore::path_for(&artifact).exists());
    }

    #[test]
    fn remove_reports_presence() {
        let tmp = tempdir().unwrap();
        let artifact = tmp.path().join("edited.png");
        let store = SidecarStore::default();
        store.save(UserTransform::IDENTITY, None, &artifact).unwrap();

        assert!(store.remove(&artifact).unwrap());
        assert!(!store.remove(&artifact).unwrap());
    }
}
