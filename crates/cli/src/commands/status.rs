// `tessera status`: show slots, stored grants and managed storage.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tessera_common::types::{AssetRecord, FileRef, UserTransform};
use tessera_pipeline::access::Resolution;
use tessera_pipeline::store::managed::AssetKind;

use crate::output::{self, OutputFormat};
use crate::session::{PackageArgs, Session};

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    package: PackageArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageStatus {
    pub root: PathBuf,
    pub slots: Vec<SlotStatus>,
    pub grants: Vec<String>,
    pub managed_originals: usize,
    pub managed_edited: usize,
    pub unreferenced: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordStatus {
    pub id: String,
    pub original: String,
    /// `ready`, `needs_permission` or `not_found`; captured originals are
    /// always ready.
    pub access: &'static str,
    pub edited: bool,
    pub transform: UserTransform,
}

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match status(&args) {
        Ok(result) => {
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn status(args: &StatusArgs) -> anyhow::Result<PackageStatus> {
    let mut session = Session::open(&args.package)?;
    let store = session.package().store().clone();
    let live = session.document.live_asset_ids();

    let originals = store.list(AssetKind::Original)?;
    let edited = store.list(AssetKind::Edited)?;
    let unreferenced =
        originals.iter().chain(&edited).filter(|entry| !live.contains(&entry.id)).count();

    let slots: Vec<(String, String, Option<AssetRecord>)> = session
        .document
        .slots
        .iter()
        .map(|(name, slot)| (name.clone(), slot.kind.label().to_string(), slot.record.clone()))
        .collect();
    let slots = slots
        .into_iter()
        .map(|(name, kind, record)| SlotStatus {
            name,
            kind,
            record: record.map(|record| record_status(&mut session, &record)),
        })
        .collect();

    if session.tokens.is_dirty() {
        session.save()?;
    }

    Ok(PackageStatus {
        root: session.package().root().to_path_buf(),
        slots,
        grants: session.tokens.keys().map(str::to_string).collect(),
        managed_originals: originals.len(),
        managed_edited: edited.len(),
        unreferenced,
    })
}

fn record_status(session: &mut Session, record: &AssetRecord) -> RecordStatus {
    let (original, access) = match &record.original {
        FileRef::Managed { id } => (format!("managed {id}"), "ready"),
        FileRef::External { path, .. } => {
            let resolver = session.pipeline.resolver().clone();
            let access = match resolver.resolve(path, &mut session.tokens) {
                Resolution::Ready(_) => "ready",
                Resolution::NeedsPermission => "needs_permission",
                Resolution::NotFound => "not_found",
            };
            (path.display().to_string(), access)
        }
    };

    RecordStatus {
        id: record.id.to_string(),
        original,
        access,
        edited: record.edited.is_some(),
        transform: record.transform,
    }
}

fn format_human(status: &PackageStatus) -> String {
    let mut lines = vec![format!("Package {}", status.root.display())];

    if status.slots.is_empty() {
        lines.push("  No slots.".into());
    } else {
        lines.push(format!("  Slots ({})", status.slots.len()));
        for slot in &status.slots {
            match &slot.record {
                None => lines.push(format!("    {} [{}] empty", slot.name, slot.kind)),
                Some(record) => lines.push(format!(
                    "    {} [{}] {} ({}){}",
                    slot.name,
                    slot.kind,
                    record.original,
                    record.access,
                    if record.transform.is_identity() { "" } else { " edited" }
                )),
            }
        }
    }

    lines.push(format!("  Grants: {}", status.grants.len()));
    lines.push(format!(
        "  Managed: {} original(s), {} edited, {} unreferenced",
        status.managed_originals, status.managed_edited, status.unreferenced
    ));
    lines.join("\n")
}
