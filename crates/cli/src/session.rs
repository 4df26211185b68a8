// One CLI invocation's view of a document package.
//
// Loads the document and token table up front and writes both back on
// `save`. Access goes through `DirectAccess`, sealed with the user's key at
// `~/.tessera/seal.key`.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tessera_common::aspect::{AspectRatio, AspectSpec, PixelSize, PresetKind, SlotKind};
use tessera_common::types::{AssetDocument, AssetRecord, ImageSlot, UserTransform};
use tessera_pipeline::access::policy::{DirectAccess, TokenSealer};
use tessera_pipeline::access::tokens::TokenTable;
use tessera_pipeline::config::global_dir;
use tessera_pipeline::security::load_or_create_seal_key;
use tessera_pipeline::store::package::DocumentPackage;
use tessera_pipeline::AssetPipeline;
use tracing::debug;

use crate::exit_code::UsageError;

const SEAL_KEY_FILE: &str = "seal.key";

/// Flags shared by every command that works inside a package.
#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Document package directory (defaults to current directory).
    #[arg(long, short = 'p', value_name = "DIR", default_value = ".")]
    pub package: PathBuf,

    /// Grant folder access without prompting.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Placement flags shared by `render` and `edit`.
#[derive(Debug, Clone, Copy, Args)]
pub struct TransformArgs {
    /// Zoom factor applied on top of the cover scale.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Clockwise rotation in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub rotate: f64,

    /// Horizontal offset as a fraction of the longer output edge.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub tx: f64,

    /// Vertical offset as a fraction of the longer output edge.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub ty: f64,
}

impl TransformArgs {
    pub fn transform(self) -> UserTransform {
        UserTransform::new(self.scale, self.rotate, self.tx, self.ty)
    }
}

pub struct Session {
    pub pipeline: AssetPipeline,
    pub document: AssetDocument,
    pub tokens: TokenTable,
}

impl Session {
    pub fn open(args: &PackageArgs) -> Result<Self> {
        let package = DocumentPackage::open(&args.package)
            .with_context(|| format!("failed to open package `{}`", args.package.display()))?;
        let key_dir = global_dir().unwrap_or_else(|| package.root().join(".tessera"));
        let key = load_or_create_seal_key(&key_dir.join(SEAL_KEY_FILE))?;

        let assume_yes = args.yes;
        let policy = DirectAccess::new(TokenSealer::new(key), move |dir: &Path| {
            assume_yes || confirm_on_stdin(dir)
        });

        let document = package.load_document()?;
        let tokens = package.load_tokens()?;
        debug!(
            package = %package.root().display(),
            slots = document.slots.len(),
            tokens = tokens.len(),
            "opened package"
        );

        Ok(Self { pipeline: AssetPipeline::new(package, Arc::new(policy)), document, tokens })
    }

    pub fn package(&self) -> &DocumentPackage {
        self.pipeline.package()
    }

    /// Write the document, then the token table if it changed.
    pub fn save(&mut self) -> Result<()> {
        let package = self.pipeline.package().clone();
        package.save_document(&self.document)?;
        if self.tokens.is_dirty() {
            package.save_tokens(&mut self.tokens)?;
        }
        Ok(())
    }

    /// The slot's kind and current record, or a usage error when the slot
    /// is missing or empty.
    pub fn filled_slot(&self, name: &str) -> Result<(SlotKind, AssetRecord)> {
        let slot = self
            .document
            .slots
            .get(name)
            .ok_or_else(|| UsageError::new(format!("no slot named `{name}`")))?;
        let record = slot
            .record
            .clone()
            .ok_or_else(|| UsageError::new(format!("slot `{name}` is empty")))?;
        Ok((slot.kind.clone(), record))
    }

    pub fn set_record(&mut self, name: &str, kind: SlotKind, record: Option<AssetRecord>) {
        self.document.slots.insert(name.to_string(), ImageSlot { kind, record });
    }
}

/// Map `--preset`/`--aspect` flags to a slot kind for a new slot named `name`.
pub fn slot_kind(name: &str, preset: Option<&str>) -> Result<SlotKind> {
    match preset {
        Some(value) => PresetKind::parse(value)
            .map(SlotKind::Preset)
            .ok_or_else(|| UsageError::new(format!("unknown preset `{value}`")).into()),
        None => Ok(SlotKind::Custom(name.to_string())),
    }
}

/// Parse `--aspect`: `source`, a preset name, or `W:H`.
pub fn parse_aspect(value: &str) -> Result<AspectSpec> {
    if value.eq_ignore_ascii_case("source") {
        return Ok(AspectSpec::Source);
    }
    if let Some(preset) = PresetKind::parse(value) {
        return Ok(AspectSpec::Preset { preset });
    }
    let ratio = AspectRatio::parse(value)
        .ok_or_else(|| UsageError::new(format!("aspect `{value}` is not `source`, a preset, or W:H")))?;
    Ok(AspectSpec::ratio(ratio.width, ratio.height))
}

pub fn parse_size(value: &str) -> Result<PixelSize> {
    PixelSize::parse(value)
        .ok_or_else(|| UsageError::new(format!("size `{value}` is not WIDTHxHEIGHT")).into())
}

fn confirm_on_stdin(dir: &Path) -> bool {
    if !io::stdin().is_terminal() {
        return false;
    }
    let mut err = io::stderr().lock();
    let _ = write!(err, "Allow tessera to read files in {}? [y/N] ", dir.display());
    let _ = err.flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
