// `tessera grant`: let the package read files in a folder across sessions.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::output::{self, OutputFormat};
use crate::session::{PackageArgs, Session};

#[derive(Debug, Args)]
pub struct GrantArgs {
    /// File whose containing folder should become readable.
    #[arg(value_name = "PATH")]
    path: PathBuf,

    #[command(flatten)]
    package: PackageArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantResult {
    pub path: PathBuf,
    pub stored_grants: usize,
}

pub fn run(args: GrantArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match grant(&args) {
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

fn grant(args: &GrantArgs) -> anyhow::Result<GrantResult> {
    let mut session = Session::open(&args.package)?;
    let pipeline = session.pipeline.clone();
    let location = pipeline.resolver().request_access(&args.path, &mut session.tokens)?;
    session.save()?;

    Ok(GrantResult { path: location.path, stored_grants: session.tokens.len() })
}

fn format_human(result: &GrantResult) -> String {
    format!(
        "Granted access to {} ({} stored grant{})",
        result.path.display(),
        result.stored_grants,
        if result.stored_grants == 1 { "" } else { "s" }
    )
}
