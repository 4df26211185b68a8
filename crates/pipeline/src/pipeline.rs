// The asset pipeline service.
//
// Resolution happens on the calling task because it needs the document's
// token table; decoding, rendering and file I/O run on the blocking pool and
// hand back a new `AssetRecord` for the caller to apply to its document.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use image::RgbaImage;
use serde::Serialize;
use tessera_common::aspect::{AspectSpec, SlotKind};
use tessera_common::error::{PipelineError, Result};
use tessera_common::types::{AssetId, AssetRecord, FileRef, SidecarRecord, UserTransform};
use tracing::{debug, info, warn};

use crate::access::policy::AccessPolicy;
use crate::access::tokens::TokenTable;
use crate::access::PermissionResolver;
use crate::compositor::encode::size_of;
use crate::compositor::{decode, encode, Compositor, Encoding, RenderRequest};
use crate::config::PipelineConfig;
use crate::lifecycle::{AssetLifecycleManager, ReclaimReport};
use crate::schedule::{defer_until_idle, EditGate, EditTicket, QuietPeriod, SessionTracker};
use crate::store::atomic::{commit_all, StagedWrite};
use crate::store::hash::sha256_hex;
use crate::store::managed::AssetKind;
use crate::store::package::DocumentPackage;
use crate::store::sidecar::SidecarStore;

/// What happens to the source file on import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OriginalPolicy {
    /// Copy the source into the package's managed store.
    #[default]
    Capture,
    /// Keep pointing at the user's file; re-resolved every session.
    Reference,
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub slot: SlotKind,
    pub source: PathBuf,
    pub original: OriginalPolicy,
    pub custom_aspect: Option<AspectSpec>,
}

impl ImportRequest {
    pub fn new(slot: SlotKind, source: impl Into<PathBuf>) -> Self {
        Self { slot, source: source.into(), original: OriginalPolicy::Capture, custom_aspect: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditRequest {
    pub transform: UserTransform,
    /// `None` keeps the record's current aspect.
    pub custom_aspect: Option<AspectSpec>,
    /// The freeform editor allows under-fill; imports never do.
    pub enforce_cover: bool,
}

impl EditRequest {
    pub fn freeform(transform: UserTransform) -> Self {
        Self { transform, custom_aspect: None, enforce_cover: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Committed(AssetRecord),
    /// A newer edit began while this one rendered; nothing was published.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub edited_removed: bool,
    pub original_removed: bool,
    /// A captured original was kept because another reference remains.
    pub original_shared: bool,
    pub token_forgotten: bool,
}

/// A rendered artifact and its sidecar, staged but not yet visible.
struct Prepared {
    id: AssetId,
    /// Transform the render actually used; stored in the sidecar.
    transform: UserTransform,
    artifact: StagedWrite,
    sidecar: StagedWrite,
    digest: String,
}

#[derive(Clone)]
pub struct AssetPipeline {
    package: DocumentPackage,
    resolver: PermissionResolver,
    compositor: Compositor,
    sidecars: SidecarStore,
    config: PipelineConfig,
    sessions: SessionTracker,
    gate: EditGate,
}

impl AssetPipeline {
    /// Pipeline over `package` using the package's effective config.
    pub fn new(package: DocumentPackage, policy: Arc<dyn AccessPolicy>) -> Self {
        let config = package.config();
        Self::with_config(package, policy, config)
    }

    pub fn with_config(
        package: DocumentPackage,
        policy: Arc<dyn AccessPolicy>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            compositor: Compositor::new(config.long_edge()),
            resolver: PermissionResolver::new(policy),
            sidecars: SidecarStore::default(),
            sessions: SessionTracker::new(),
            gate: EditGate::new(),
            package,
            config,
        }
    }

    pub fn package(&self) -> &DocumentPackage {
        &self.package
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Quiet period for debouncing edits of this package.
    pub fn quiet_period(&self) -> QuietPeriod {
        QuietPeriod::from_duration(self.config.edit_quiet())
    }

    /// Start an edit session for `record`, superseding earlier ones.
    pub fn begin_edit(&self, record: &AssetRecord) -> EditTicket {
        self.sessions.begin(&record.id)
    }

    /// Whether results for `ticket` may still be applied to the document.
    pub fn is_current(&self, ticket: &EditTicket) -> bool {
        self.sessions.is_current(ticket)
    }

    // ── Import ─────────────────────────────────────────────────────

    /// Import `request.source` into a slot: capture (or reference) the
    /// original and render the first edited artifact with cover enforced.
    pub async fn import(&self, request: ImportRequest, tokens: &mut TokenTable) -> Result<AssetRecord> {
        let location = self.resolver.resolve(&request.source, tokens).into_result(&request.source)?;
        let key = tokens.candidates_for(&request.source).into_iter().next().map(|(key, _)| key);

        let _edit = self.gate.enter();
        let this = self.clone();
        run_blocking(move || this.import_blocking(request, &location.path, key)).await
    }

    fn import_blocking(
        &self,
        request: ImportRequest,
        readable: &Path,
        token_key: Option<String>,
    ) -> Result<AssetRecord> {
        let bytes = read_source(readable)?;
        let source = decode(&bytes)?;

        let original = match request.original {
            OriginalPolicy::Capture => {
                FileRef::managed(self.package.store().import_original(&bytes, sniff_ext(&bytes))?)
            }
            OriginalPolicy::Reference => FileRef::External { path: request.source.clone(), token_key },
        };

        let mut record = AssetRecord::new(original);
        record.custom_aspect = request.custom_aspect;

        let committed = self
            .prepare(&request.slot, &source, record.transform, record.custom_aspect, true)
            .and_then(|prepared| {
                let applied = prepared.transform;
                self.commit(prepared).map(|edited| (edited, applied))
            });
        match committed {
            Ok((edited, applied)) => {
                record.edited = Some(edited);
                record.transform = applied;
            }
            Err(error) => {
                if let Some(id) = record.original.managed_id() {
                    if let Err(cleanup) = self.package.store().remove_original(id) {
                        warn!(id = %id, error = %cleanup, "failed to drop captured original");
                    }
                }
                return Err(error);
            }
        }

        info!(
            record = %record.id,
            slot = request.slot.label(),
            source = %request.source.display(),
            "imported image"
        );
        Ok(record)
    }

    // ── Edit ───────────────────────────────────────────────────────

    /// Re-render `record` from its original under `request.transform` and
    /// commit a new edited artifact plus sidecar. The committed record and
    /// sidecar carry the transform as placed, so a covering edit stores its
    /// clamped scale and offset.
    ///
    /// The render always runs to completion. If `ticket` was superseded by
    /// then, nothing is published and [`EditOutcome::Superseded`] is
    /// returned. Callers re-check [`is_current`](Self::is_current) before
    /// applying a committed record to the document.
    pub async fn apply_edit(
        &self,
        ticket: &EditTicket,
        slot: &SlotKind,
        record: &AssetRecord,
        request: EditRequest,
        tokens: &mut TokenTable,
    ) -> Result<EditOutcome> {
        if ticket.record() != &record.id {
            warn!(ticket = %ticket.record(), record = %record.id, "edit ticket belongs to another record");
            return Ok(EditOutcome::Superseded);
        }
        let location =
            self.resolver.resolve_ref(&record.original, AssetKind::Original, self.package.store(), tokens)?;

        let _edit = self.gate.enter();
        let this = self.clone();
        let (ticket, slot, record) = (ticket.clone(), slot.clone(), record.clone());
        run_blocking(move || {
            let source = decode(&read_source(&location.path)?)?;
            let custom_aspect = request.custom_aspect.or(record.custom_aspect);
            let prepared =
                this.prepare(&slot, &source, request.transform, custom_aspect, request.enforce_cover)?;
            let applied = prepared.transform;

            if !this.sessions.is_current(&ticket) {
                debug!(record = %record.id, generation = ticket.generation(), "edit superseded; discarding render");
                return Ok(EditOutcome::Superseded);
            }

            let edited = this.commit(prepared)?;
            Ok(EditOutcome::Committed(AssetRecord {
                edited: Some(edited),
                transform: applied,
                custom_aspect,
                updated_at: Utc::now(),
                ..record
            }))
        })
        .await
    }

    /// The sidecar stored for `record`'s edited artifact, if any.
    pub fn edit_state(&self, record: &AssetRecord) -> Result<Option<SidecarRecord>> {
        match self.edited_path(record)? {
            Some(artifact) => self.sidecars.load(&artifact),
            None => Ok(None),
        }
    }

    /// Transform to resume editing with. No sidecar means identity.
    pub fn resume_transform(&self, record: &AssetRecord) -> Result<UserTransform> {
        Ok(self.edit_state(record)?.map(|r| r.transform).unwrap_or(UserTransform::IDENTITY))
    }

    // ── Clear & reclaim ────────────────────────────────────────────

    /// Remove a slot's edited artifact and sidecar; with `drop_original`,
    /// also a managed original or the stored token for an external one.
    /// External files themselves are never deleted.
    ///
    /// `in_use` holds the managed ids the document still references once
    /// this slot is gone. A managed original listed there is kept.
    pub fn clear_slot(
        &self,
        record: &AssetRecord,
        drop_original: bool,
        in_use: &BTreeSet<AssetId>,
        tokens: &mut TokenTable,
    ) -> Result<ClearReport> {
        self.sessions.end(&record.id);
        let store = self.package.store();
        let mut report = ClearReport::default();

        if let Some(id) = record.edited.as_ref().and_then(FileRef::managed_id) {
            report.edited_removed = store.remove(AssetKind::Edited, id)?;
        }
        if drop_original {
            match &record.original {
                FileRef::Managed { id } if in_use.contains(id) => {
                    debug!(id = %id, "original still referenced; keeping it");
                    report.original_shared = true;
                }
                FileRef::Managed { id } => report.original_removed = store.remove_original(id)?,
                FileRef::External { path, .. } => {
                    report.token_forgotten = self.resolver.forget(path, tokens)
                }
            }
        }

        info!(record = %record.id, ?report, "cleared slot");
        Ok(report)
    }

    /// Reclaim managed files unreferenced by `snapshot`, which is taken
    /// again immediately before deletion.
    pub fn reclaim<F>(&self, snapshot: F) -> Result<ReclaimReport>
    where
        F: FnMut() -> Result<BTreeSet<AssetId>>,
    {
        AssetLifecycleManager::new(self.package.store().clone()).reclaim_with(snapshot)
    }

    /// Reclaim against the document saved in the package.
    pub fn reclaim_saved(&self) -> Result<ReclaimReport> {
        let package = self.package.clone();
        self.reclaim(move || Ok(package.load_document()?.live_asset_ids()))
    }

    /// Wait out the reclamation delay and any in-flight edits, then reclaim.
    pub async fn reclaim_after_session<F>(&self, snapshot: F) -> Result<ReclaimReport>
    where
        F: FnMut() -> Result<BTreeSet<AssetId>> + Send + 'static,
    {
        let this = self.clone();
        defer_until_idle(self.config.reclaim_delay(), self.gate.clone(), move || this.reclaim(snapshot))
            .await
            .map_err(join_failure)?
            .map_err(|error| PipelineError::io("deferred reclamation failed", std::io::Error::other(error)))?
    }

    // ── Internals ──────────────────────────────────────────────────

    fn prepare(
        &self,
        slot: &SlotKind,
        source: &RgbaImage,
        transform: UserTransform,
        custom_aspect: Option<AspectSpec>,
        enforce_cover: bool,
    ) -> Result<Prepared> {
        let source_size = size_of(source);
        let target = slot.target(custom_aspect);
        let request = RenderRequest {
            target: target.aspect.resolve(source_size),
            max_pixels: target.max_pixels,
            transform: Some(transform),
            enforce_cover,
        };
        let applied = self.compositor.place(source_size, &request)?.applied;
        let raster = self.compositor.render(source, &request)?;

        let encoding =
            Encoding::for_kind(self.config.encoding_for(slot, &target), self.config.quality());
        let bytes = encode(&raster, encoding)?;
        let digest = sha256_hex(&bytes);

        let (id, artifact) = self.package.store().stage_edited(&bytes, encoding.extension())?;
        let aspect_override = custom_aspect.and_then(|aspect| aspect.as_override(source_size));
        let sidecar = self.sidecars.stage(applied, aspect_override, artifact.dest_path())?;
        Ok(Prepared { id, transform: applied, artifact, sidecar, digest })
    }

    /// Publish the sidecar, then the artifact, so an artifact is never
    /// visible without the transform that produced it.
    fn commit(&self, prepared: Prepared) -> Result<FileRef> {
        let Prepared { id, artifact, sidecar, digest, .. } = prepared;
        let sidecar_path = sidecar.dest_path().to_path_buf();
        if let Err(error) = commit_all(vec![sidecar, artifact]) {
            if let Err(cleanup) = fs::remove_file(&sidecar_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %sidecar_path.display(), error = %cleanup, "failed to remove orphaned sidecar");
                }
            }
            return Err(error);
        }
        info!(id = %id, sha256 = %digest, "committed edited artifact");
        Ok(FileRef::managed(id))
    }

    fn edited_path(&self, record: &AssetRecord) -> Result<Option<PathBuf>> {
        match &record.edited {
            None => Ok(None),
            Some(FileRef::Managed { id }) => self.package.store().locate(AssetKind::Edited, id),
            Some(FileRef::External { path, .. }) => Ok(Some(path.clone())),
        }
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job).await.map_err(join_failure)?
}

fn join_failure(error: impl std::error::Error + Send + Sync + 'static) -> PipelineError {
    PipelineError::io("pipeline task did not complete", std::io::Error::other(error))
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => PipelineError::NotFound { path: path.to_path_buf() },
        std::io::ErrorKind::PermissionDenied => {
            PipelineError::NeedsPermission { path: path.to_path_buf() }
        }
        _ => PipelineError::io(format!("failed to read `{}`", path.display()), error),
    })
}

/// File extension for the bytes' detected format.
fn sniff_ext(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("img")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::policy::{DirectAccess, TokenSealer};
    use image::Rgba;
    use tempfile::tempdir;
    use tessera_common::aspect::{PixelSize, PresetKind};

    fn pipeline(root: &Path) -> AssetPipeline {
        let package = DocumentPackage::open(root).unwrap();
        let policy = Arc::new(DirectAccess::new(TokenSealer::new([3u8; 32]), |_: &Path| false));
        AssetPipeline::with_config(
            package,
            policy,
            PipelineConfig { default_long_edge: 64, ..PipelineConfig::default() },
        )
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        let raster = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 200, 255]));
        fs::write(path, encode(&raster, Encoding::Png).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn import_captures_original_and_writes_sidecar() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 40, 30);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();

        let record = pipeline
            .import(ImportRequest::new(SlotKind::Preset(PresetKind::Poster), &source), &mut tokens)
            .await
            .unwrap();

        let original = record.original.managed_id().expect("original should be captured");
        let stored = pipeline.package().store().locate(AssetKind::Original, original).unwrap().unwrap();
        assert_eq!(stored.extension().unwrap(), "png");
        assert_eq!(pipeline.edit_state(&record).unwrap().unwrap().transform, UserTransform::IDENTITY);
    }

    #[tokio::test]
    async fn referenced_original_stays_external() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 20, 20);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();

        let request = ImportRequest {
            original: OriginalPolicy::Reference,
            ..ImportRequest::new(SlotKind::Custom("gallery".into()), &source)
        };
        let record = pipeline.import(request, &mut tokens).await.unwrap();

        assert_eq!(record.original, FileRef::external(&source));
        assert!(pipeline.package().store().list_originals().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_source_leaves_no_original_behind() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("notes.png");
        fs::write(&source, b"not an image").unwrap();
        let pipeline = pipeline(&tmp.path().join("pkg"));

        let error = pipeline
            .import(ImportRequest::new(SlotKind::Preset(PresetKind::Icon), &source), &mut TokenTable::new())
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::EncodeFailure(_)));
        assert!(pipeline.package().store().list_originals().unwrap().is_empty());
    }

    #[tokio::test]
    async fn superseded_edit_publishes_nothing() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 32, 32);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();
        let slot = SlotKind::Preset(PresetKind::Icon);
        let record = pipeline.import(ImportRequest::new(slot.clone(), &source), &mut tokens).await.unwrap();

        let stale = pipeline.begin_edit(&record);
        let _newer = pipeline.begin_edit(&record);
        let request = EditRequest::freeform(UserTransform::new(2.0, 10.0, 0.0, 0.0));
        let outcome =
            pipeline.apply_edit(&stale, &slot, &record, request, &mut tokens).await.unwrap();

        assert_eq!(outcome, EditOutcome::Superseded);
        assert_eq!(pipeline.package().store().list(AssetKind::Edited).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn committed_edit_is_resumable() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 32, 24);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();
        let slot = SlotKind::Preset(PresetKind::Thumbnail);
        let record = pipeline.import(ImportRequest::new(slot.clone(), &source), &mut tokens).await.unwrap();

        let transform = UserTransform::new(1.5, 45.0, 0.1, -0.2);
        let ticket = pipeline.begin_edit(&record);
        let EditOutcome::Committed(updated) = pipeline
            .apply_edit(&ticket, &slot, &record, EditRequest::freeform(transform), &mut tokens)
            .await
            .unwrap()
        else {
            panic!("edit should commit");
        };

        assert_ne!(updated.edited, record.edited);
        assert_eq!(updated.transform, transform);
        assert_eq!(pipeline.resume_transform(&updated).unwrap(), transform);
    }

    #[tokio::test]
    async fn edit_without_aspect_keeps_record_aspect() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 40, 30);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();
        let slot = SlotKind::Custom("strip".into());
        let request = ImportRequest {
            custom_aspect: Some(AspectSpec::ratio(1.0, 2.0)),
            ..ImportRequest::new(slot.clone(), &source)
        };
        let record = pipeline.import(request, &mut tokens).await.unwrap();

        let ticket = pipeline.begin_edit(&record);
        let request = EditRequest::freeform(UserTransform::new(1.2, 0.0, 0.0, 0.0));
        let EditOutcome::Committed(updated) =
            pipeline.apply_edit(&ticket, &slot, &record, request, &mut tokens).await.unwrap()
        else {
            panic!("edit should commit");
        };

        assert_eq!(updated.custom_aspect, Some(AspectSpec::ratio(1.0, 2.0)));
        let id = updated.edited.as_ref().and_then(FileRef::managed_id).unwrap();
        let path = pipeline.package().store().locate(AssetKind::Edited, id).unwrap().unwrap();
        assert_eq!(decode(&fs::read(path).unwrap()).unwrap().dimensions(), (32, 64));
        let sidecar = pipeline.edit_state(&updated).unwrap().unwrap();
        let expected = AspectSpec::ratio(1.0, 2.0).resolve(PixelSize::new(40, 30));
        assert_eq!(sidecar.aspect_override, Some(expected));
    }

    #[tokio::test]
    async fn clear_slot_keeps_original_still_in_use() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 16, 16);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();
        let record = pipeline
            .import(ImportRequest::new(SlotKind::Preset(PresetKind::Icon), &source), &mut tokens)
            .await
            .unwrap();
        let original = record.original.managed_id().unwrap().clone();
        let store = pipeline.package().store();

        let in_use = BTreeSet::from([original.clone()]);
        let report = pipeline.clear_slot(&record, true, &in_use, &mut tokens).unwrap();
        assert!(report.edited_removed);
        assert!(report.original_shared && !report.original_removed);
        assert!(store.locate(AssetKind::Original, &original).unwrap().is_some());

        let report = pipeline.clear_slot(&record, true, &BTreeSet::new(), &mut tokens).unwrap();
        assert!(report.original_removed && !report.original_shared);
        assert!(store.locate(AssetKind::Original, &original).unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_slot_keeps_external_files() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("photo.png");
        write_png(&source, 16, 16);
        let pipeline = pipeline(&tmp.path().join("pkg"));
        let mut tokens = TokenTable::new();
        let request = ImportRequest {
            original: OriginalPolicy::Reference,
            ..ImportRequest::new(SlotKind::Preset(PresetKind::Icon), &source)
        };
        let record = pipeline.import(request, &mut tokens).await.unwrap();

        let report = pipeline.clear_slot(&record, true, &BTreeSet::new(), &mut tokens).unwrap();

        assert!(report.edited_removed);
        assert!(!report.original_removed);
        assert!(source.exists());
        assert!(pipeline.package().store().list(AssetKind::Edited).unwrap().is_empty());
    }
}
