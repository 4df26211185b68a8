// CLI subcommand dispatch.

use std::future::Future;

use anyhow::Context;
use clap::Subcommand;

pub mod clear;
pub mod edit;
pub mod grant;
pub mod import;
pub mod reclaim;
pub mod render;
pub mod status;

#[derive(Subcommand)]
pub enum Command {
    /// Render an image file to a target aspect without a package
    Render(render::RenderArgs),
    /// Import an image into a document slot
    Import(import::ImportArgs),
    /// Re-render a slot from its original with a new placement
    Edit(edit::EditArgs),
    /// Remove a slot's edited artifact, optionally its original too
    Clear(clear::ClearArgs),
    /// Grant the package read access to a file's folder
    Grant(grant::GrantArgs),
    /// Delete managed files the saved document no longer references
    Reclaim(reclaim::ReclaimArgs),
    /// Show slots, stored grants and managed storage
    Status(status::StatusArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Render(args) => render::run(args),
        Command::Import(args) => import::run(args),
        Command::Edit(args) => edit::run(args),
        Command::Clear(args) => clear::run(args),
        Command::Grant(args) => grant::run(args),
        Command::Reclaim(args) => reclaim::run(args),
        Command::Status(args) => status::run(args),
    }
}

/// Drive an async pipeline call from a synchronous command.
pub(crate) fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}
