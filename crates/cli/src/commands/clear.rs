// `tessera clear`: empty a slot.

use clap::Args;
use serde::Serialize;
use tessera_pipeline::pipeline::ClearReport;

use crate::output::{self, OutputFormat};
use crate::session::{PackageArgs, Session};

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Slot to clear.
    #[arg(long, short = 's')]
    slot: String,

    /// Also delete a captured original, or forget the grant for a
    /// referenced one. Referenced files are never deleted, and a captured
    /// original another slot still uses is kept.
    #[arg(long)]
    drop_original: bool,

    #[command(flatten)]
    package: PackageArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub slot: String,
    #[serde(flatten)]
    pub report: ClearReport,
}

pub fn run(args: ClearArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match clear(&args) {
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

fn clear(args: &ClearArgs) -> anyhow::Result<ClearResult> {
    let mut session = Session::open(&args.package)?;
    let (kind, record) = session.filled_slot(&args.slot)?;

    session.set_record(&args.slot, kind, None);
    let in_use = session.document.live_asset_ids();

    let pipeline = session.pipeline.clone();
    let report = pipeline.clear_slot(&record, args.drop_original, &in_use, &mut session.tokens)?;
    session.save()?;

    Ok(ClearResult { slot: args.slot.clone(), report })
}

fn format_human(result: &ClearResult) -> String {
    let mut lines = vec![format!("Cleared `{}`", result.slot)];
    if result.report.edited_removed {
        lines.push("  removed edited artifact".into());
    }
    if result.report.original_removed {
        lines.push("  removed captured original".into());
    }
    if result.report.original_shared {
        lines.push("  kept captured original: still referenced".into());
    }
    if result.report.token_forgotten {
        lines.push("  forgot folder grant".into());
    }
    lines.join("\n")
}
