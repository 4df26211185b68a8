// `tessera import`: bring an image into a document slot.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tessera_common::error::PipelineError;
use tessera_common::types::AssetRecord;
use tessera_pipeline::{ImportRequest, OriginalPolicy};
use tracing::info;

use super::block_on;
use crate::output::{self, OutputFormat};
use crate::session::{parse_aspect, slot_kind, PackageArgs, Session};

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Image file to import.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Slot to fill; created if the document has no slot by this name.
    #[arg(long, short = 's')]
    slot: String,

    /// Preset for a new slot (thumbnail, banner, hero_banner, poster, icon).
    #[arg(long)]
    preset: Option<String>,

    /// Aspect override: `source`, a preset name, or `W:H`.
    #[arg(long)]
    aspect: Option<String>,

    /// Keep pointing at SOURCE instead of copying it into the package.
    #[arg(long)]
    reference: bool,

    #[command(flatten)]
    package: PackageArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub slot: String,
    pub record: AssetRecord,
}

pub fn run(args: ImportArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match import(&args) {
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

fn import(args: &ImportArgs) -> anyhow::Result<ImportResult> {
    let mut session = Session::open(&args.package)?;
    let kind = match session.document.slots.get(&args.slot) {
        Some(existing) if args.preset.is_none() => existing.kind.clone(),
        _ => slot_kind(&args.slot, args.preset.as_deref())?,
    };

    let request = ImportRequest {
        original: if args.reference { OriginalPolicy::Reference } else { OriginalPolicy::Capture },
        custom_aspect: args.aspect.as_deref().map(parse_aspect).transpose()?,
        ..ImportRequest::new(kind.clone(), &args.source)
    };

    let pipeline = session.pipeline.clone();
    let record = block_on(async {
        match pipeline.import(request.clone(), &mut session.tokens).await {
            Err(PipelineError::NeedsPermission { path }) => {
                pipeline.resolver().request_access(&path, &mut session.tokens)?;
                pipeline.import(request, &mut session.tokens).await
            }
            other => other,
        }
    })??;

    session.set_record(&args.slot, kind, Some(record.clone()));
    session.save()?;
    info!(slot = %args.slot, record = %record.id, "imported into slot");

    Ok(ImportResult { slot: args.slot.clone(), record })
}

fn format_human(result: &ImportResult) -> String {
    let mut lines = vec![format!("Imported into `{}` ({})", result.slot, result.record.id)];
    if let Some(path) = result.record.original.external_path() {
        lines.push(format!("  original  {} (referenced)", path.display()));
    }
    if let Some(edited) = result.record.edited.as_ref().and_then(|e| e.managed_id()) {
        lines.push(format!("  edited    {edited}"));
    }
    lines.join("\n")
}
