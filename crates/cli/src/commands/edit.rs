// `tessera edit`: re-render a slot from its original with a new placement.

use clap::Args;
use serde::Serialize;
use tessera_common::error::PipelineError;
use tessera_common::types::{AssetRecord, UserTransform};
use tessera_pipeline::{EditOutcome, EditRequest};

use super::block_on;
use crate::output::{self, OutputFormat};
use crate::session::{parse_aspect, PackageArgs, Session, TransformArgs};

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Slot to edit.
    #[arg(long, short = 's')]
    slot: String,

    #[command(flatten)]
    placement: TransformArgs,

    /// New aspect override: `source`, a preset name, or `W:H`.
    #[arg(long)]
    aspect: Option<String>,

    /// Keep the output fully covered, as on import.
    #[arg(long)]
    cover: bool,

    #[command(flatten)]
    package: PackageArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditResult {
    pub slot: String,
    pub previous: UserTransform,
    pub record: AssetRecord,
}

pub fn run(args: EditArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match edit(&args) {
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

fn edit(args: &EditArgs) -> anyhow::Result<EditResult> {
    let mut session = Session::open(&args.package)?;
    let (kind, record) = session.filled_slot(&args.slot)?;
    let previous = session.pipeline.resume_transform(&record)?;

    let request = EditRequest {
        transform: args.placement.transform(),
        custom_aspect: args.aspect.as_deref().map(parse_aspect).transpose()?,
        enforce_cover: args.cover,
    };

    let pipeline = session.pipeline.clone();
    let ticket = pipeline.begin_edit(&record);
    let outcome = block_on(async {
        match pipeline.apply_edit(&ticket, &kind, &record, request, &mut session.tokens).await {
            Err(PipelineError::NeedsPermission { path }) => {
                pipeline.resolver().request_access(&path, &mut session.tokens)?;
                pipeline.apply_edit(&ticket, &kind, &record, request, &mut session.tokens).await
            }
            other => other,
        }
    })??;

    let EditOutcome::Committed(updated) = outcome else {
        anyhow::bail!("edit of slot `{}` was superseded", args.slot);
    };
    session.set_record(&args.slot, kind, Some(updated.clone()));
    session.save()?;

    Ok(EditResult { slot: args.slot.clone(), previous, record: updated })
}

fn format_human(result: &EditResult) -> String {
    let t = &result.record.transform;
    format!(
        "Edited `{}`: scale {:.3}, rotation {:.1}°, offset ({:.3}, {:.3})",
        result.slot, t.scale, t.rotation_degrees, t.translation.x, t.translation.y
    )
}
