// `tessera render`: place one image into a target frame and write it out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use tessera_common::aspect::EncodingKind;
use tessera_pipeline::compositor::encode::size_of;
use tessera_pipeline::compositor::{decode, encode, Compositor, Encoding, RenderRequest};
use tessera_pipeline::config::PipelineConfig;
use tessera_pipeline::store::atomic::AtomicWriter;
use tessera_pipeline::store::hash::sha256_hex;
use tracing::info;

use crate::output::{self, OutputFormat};
use crate::session::{parse_aspect, parse_size, TransformArgs};

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Source image.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Output file; `.png` is lossless, anything else is JPEG.
    #[arg(long, short = 'o', value_name = "PATH")]
    out: PathBuf,

    /// Target aspect: `source`, a preset name, or `W:H`.
    #[arg(long, default_value = "source")]
    aspect: String,

    /// Exact output size, e.g. `2560x1440`.
    #[arg(long, value_name = "WxH")]
    size: Option<String>,

    /// Longer output edge when `--size` is not given.
    #[arg(long)]
    long_edge: Option<u32>,

    #[command(flatten)]
    placement: TransformArgs,

    /// Allow the placement to leave uncovered margins.
    #[arg(long)]
    freeform: bool,

    /// JPEG quality (1–100).
    #[arg(long)]
    quality: Option<u8>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderResult {
    pub out: PathBuf,
    pub width: u32,
    pub height: u32,
    pub encoding: &'static str,
    pub sha256: String,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match render(&args) {
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

fn render(args: &RenderArgs) -> anyhow::Result<RenderResult> {
    let config = PipelineConfig::load(Path::new("."));
    let bytes = fs::read(&args.source)
        .with_context(|| format!("failed to read `{}`", args.source.display()))?;
    let source = decode(&bytes)?;

    let target = parse_aspect(&args.aspect)?.resolve(size_of(&source));
    let max_pixels = args.size.as_deref().map(parse_size).transpose()?;
    let request = RenderRequest::new(target)
        .max_pixels(max_pixels)
        .transform(args.placement.transform())
        .enforce_cover(!args.freeform);

    let compositor = Compositor::new(args.long_edge.unwrap_or_else(|| config.long_edge()));
    let raster = compositor.render(&source, &request)?;

    let encoding =
        Encoding::for_kind(encoding_for_path(&args.out), args.quality.unwrap_or_else(|| config.quality()));
    let encoded = encode(&raster, encoding)?;
    AtomicWriter::new().write(&encoded, &args.out)?;

    let sha256 = sha256_hex(&encoded);
    info!(out = %args.out.display(), sha256 = %sha256, "rendered image");
    Ok(RenderResult {
        out: args.out.clone(),
        width: raster.width(),
        height: raster.height(),
        encoding: encoding.extension(),
        sha256,
    })
}

fn encoding_for_path(path: &Path) -> EncodingKind {
    let is_png = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("png"));
    if is_png {
        EncodingKind::Lossless
    } else {
        EncodingKind::Lossy
    }
}

fn format_human(result: &RenderResult) -> String {
    format!(
        "Wrote {} ({}x{} {})\n  sha256 {}",
        result.out.display(),
        result.width,
        result.height,
        result.encoding,
        result.sha256
    )
}
