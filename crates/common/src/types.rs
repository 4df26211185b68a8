// Core domain types shared across all Tessera crates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aspect::{AspectRatio, AspectSpec, SlotKind};
use crate::error::{PipelineError, Result};
use crate::path::{normalize_asset_id, IdentifierError};

/// Identifier of a file in the app-owned managed store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        normalize_asset_id(input).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AssetId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

/// Where an artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileRef {
    /// A user-owned file outside the package. `token_key` names the entry in
    /// the document's token table used to re-open it under a sandbox.
    External {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_key: Option<String>,
    },
    /// A file inside the package's managed store.
    Managed { id: AssetId },
}

impl FileRef {
    pub fn external(path: impl Into<PathBuf>) -> Self {
        Self::External { path: path.into(), token_key: None }
    }

    pub fn managed(id: AssetId) -> Self {
        Self::Managed { id }
    }

    pub fn managed_id(&self) -> Option<&AssetId> {
        match self {
            Self::Managed { id } => Some(id),
            Self::External { .. } => None,
        }
    }

    pub fn external_path(&self) -> Option<&Path> {
        match self {
            Self::External { path, .. } => Some(path),
            Self::Managed { .. } => None,
        }
    }
}

/// Translation expressed as a fraction of the longer output edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub x: f64,
    pub y: f64,
}

/// User-controlled placement of the source inside the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTransform {
    pub scale: f64,
    pub rotation_degrees: f64,
    pub translation: Translation,
}

impl Default for UserTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl UserTransform {
    pub const IDENTITY: Self =
        Self { scale: 1.0, rotation_degrees: 0.0, translation: Translation { x: 0.0, y: 0.0 } };

    pub fn new(scale: f64, rotation_degrees: f64, x: f64, y: f64) -> Self {
        Self { scale, rotation_degrees, translation: Translation { x, y } }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Reject values the compositor cannot place: non-positive or non-finite
    /// scale and non-finite rotation/translation. Range clamping is left to
    /// the caller.
    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PipelineError::InvalidTransform(format!(
                "scale must be a positive finite number, got {}",
                self.scale
            )));
        }
        if !self.rotation_degrees.is_finite() {
            return Err(PipelineError::InvalidTransform("rotation must be finite".into()));
        }
        if !(self.translation.x.is_finite() && self.translation.y.is_finite()) {
            return Err(PipelineError::InvalidTransform("translation must be finite".into()));
        }
        Ok(())
    }
}

/// The record persisted next to an edited artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarRecord {
    pub transform: UserTransform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_override: Option<AspectRatio>,
}

/// One image slot's state in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub original: FileRef,
    /// Absent until the first render commits.
    #[serde(default)]
    pub edited: Option<FileRef>,
    #[serde(default)]
    pub custom_aspect: Option<AspectSpec>,
    #[serde(default)]
    pub transform: UserTransform,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    pub fn new(original: FileRef) -> Self {
        Self {
            id: AssetId::generate(),
            original,
            edited: None,
            custom_aspect: None,
            transform: UserTransform::IDENTITY,
            updated_at: Utc::now(),
        }
    }

    /// Managed identifiers this record keeps alive.
    pub fn managed_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.original.managed_id().into_iter().chain(self.edited.as_ref().and_then(FileRef::managed_id))
    }
}

/// A named image slot and its current record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSlot {
    pub kind: SlotKind,
    #[serde(default)]
    pub record: Option<AssetRecord>,
}

/// A catalog entry that can carry a thumbnail and an attached file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub id: String,
    #[serde(default)]
    pub thumbnail: Option<AssetRecord>,
    #[serde(default)]
    pub attachment: Option<FileRef>,
}

/// The part of the document the pipeline reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetDocument {
    #[serde(default)]
    pub slots: BTreeMap<String, ImageSlot>,
    #[serde(default)]
    pub items: Vec<CollectionItem>,
}

impl AssetDocument {
    /// Every managed identifier referenced by a slot, a collection item's
    /// thumbnail, or a collection item's attachment.
    pub fn live_asset_ids(&self) -> BTreeSet<AssetId> {
        let slot_ids = self.slots.values().filter_map(|slot| slot.record.as_ref());
        let thumb_ids = self.items.iter().filter_map(|item| item.thumbnail.as_ref());

        let mut live: BTreeSet<AssetId> =
            slot_ids.chain(thumb_ids).flat_map(AssetRecord::managed_ids).cloned().collect();
        live.extend(
            self.items.iter().filter_map(|item| item.attachment.as_ref()?.managed_id().cloned()),
        );
        live
    }

    pub fn record(&self, slot: &str) -> Option<&AssetRecord> {
        self.slots.get(slot)?.record.as_ref()
    }
}
