// Reclamation of managed files no live document field references.
//
// Only the package's own managed store is scanned. Files at external paths
// are never candidates, whatever the document says about them.

use std::collections::BTreeSet;

use serde::Serialize;
use tessera_common::error::Result;
use tessera_common::types::AssetId;
use tracing::{debug, info, warn};

use crate::store::managed::{AssetKind, ManagedEntry, ManagedStore};

/// One managed file removed by a reclamation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimedAsset {
    pub id: AssetId,
    pub kind: AssetKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimFailure {
    pub id: AssetId,
    pub kind: AssetKind,
    pub error: String,
}

/// Result of a reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Managed files examined.
    pub scanned: usize,
    pub removed: Vec<ReclaimedAsset>,
    /// Candidates that were referenced again by the time of deletion.
    pub retained: Vec<AssetId>,
    pub failed: Vec<ReclaimFailure>,
}

impl ReclaimReport {
    pub fn removed_ids(&self) -> BTreeSet<&AssetId> {
        self.removed.iter().map(|r| &r.id).collect()
    }
}

pub struct AssetLifecycleManager {
    store: ManagedStore,
}

impl AssetLifecycleManager {
    pub fn new(store: ManagedStore) -> Self {
        Self { store }
    }

    /// Delete every managed original and edited artifact absent from `live`.
    pub fn reclaim(&self, live: &BTreeSet<AssetId>) -> Result<ReclaimReport> {
        self.reclaim_with(|| Ok(live.clone()))
    }

    /// Like [`reclaim`](Self::reclaim), but takes the live set from
    /// `snapshot`, which is called once to pick candidates and again just
    /// before deleting them. An identifier referenced in either snapshot is
    /// kept. This narrows, but does not close, the race with concurrent
    /// document edits.
    pub fn reclaim_with<F>(&self, mut snapshot: F) -> Result<ReclaimReport>
    where
        F: FnMut() -> Result<BTreeSet<AssetId>>,
    {
        let live = snapshot()?;
        let mut entries = self.store.list(AssetKind::Original)?;
        entries.extend(self.store.list(AssetKind::Edited)?);

        let mut report = ReclaimReport { scanned: entries.len(), ..ReclaimReport::default() };
        let candidates: Vec<ManagedEntry> =
            entries.into_iter().filter(|entry| !live.contains(&entry.id)).collect();
        if candidates.is_empty() {
            debug!(scanned = report.scanned, "nothing to reclaim");
            return Ok(report);
        }

        let live = snapshot()?;
        for entry in candidates {
            if live.contains(&entry.id) {
                debug!(id = %entry.id, "candidate became live again; keeping");
                report.retained.push(entry.id);
                continue;
            }
            match self.store.remove_entry(&entry) {
                Ok(()) => report.removed.push(ReclaimedAsset { id: entry.id, kind: entry.kind }),
                Err(error) => {
                    warn!(id = %entry.id, error = %error, "failed to reclaim managed file");
                    report.failed.push(ReclaimFailure {
                        id: entry.id,
                        kind: entry.kind,
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed.len(),
            retained = report.retained.len(),
            failed = report.failed.len(),
            "reclamation finished"
        );
        Ok(report)
    }
}
