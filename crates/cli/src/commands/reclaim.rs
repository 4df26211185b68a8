// `tessera reclaim`: delete managed files the saved document no longer uses.

use clap::Args;
use tessera_pipeline::lifecycle::ReclaimReport;

use crate::output::{self, OutputFormat};
use crate::session::{PackageArgs, Session};

#[derive(Debug, Args)]
pub struct ReclaimArgs {
    #[command(flatten)]
    package: PackageArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: ReclaimArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = Session::open(&args.package)
        .and_then(|session| session.pipeline.reclaim_saved().map_err(Into::into));
    match result {
        Ok(report) => {
            output::print_output(format, &report, format_human)?;
            if !report.failed.is_empty() {
                output::print_warning(
                    format,
                    "RECLAIM_PARTIAL",
                    &format!("{} file(s) could not be removed", report.failed.len()),
                );
            }
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn format_human(report: &ReclaimReport) -> String {
    let mut lines =
        vec![format!("Scanned {} managed file(s), removed {}", report.scanned, report.removed.len())];
    for asset in &report.removed {
        lines.push(format!("  - {:?} {}", asset.kind, asset.id));
    }
    for id in &report.retained {
        lines.push(format!("  kept {id} (referenced again before deletion)"));
    }
    for failure in &report.failed {
        lines.push(format!("  ! {} {}", failure.id, failure.error));
    }
    lines.join("\n")
}
