// Cover-fit placement of a source raster inside an output frame.
//
// Coordinates are y-down pixel space. Pixel (i, j) covers [i, i+1) x [j, j+1)
// and is sampled at its center.

use kurbo::{Affine, Point, Vec2};
use tessera_common::aspect::{AspectRatio, PixelSize};
use tessera_common::error::{PipelineError, Result};
use tessera_common::types::UserTransform;

/// Output pixel size for `target`. A pixel bound is used verbatim; otherwise
/// the ratio is scaled so its longer edge is `long_edge`.
pub fn output_size(target: AspectRatio, max_pixels: Option<PixelSize>, long_edge: u32) -> PixelSize {
    if let Some(size) = max_pixels {
        return PixelSize::new(size.width.max(1), size.height.max(1));
    }

    let long = long_edge.max(1);
    let ratio = target.value();
    let short = |v: f64| (v.round() as u32).clamp(1, long);
    if ratio >= 1.0 {
        PixelSize::new(long, short(f64::from(long) / ratio))
    } else {
        PixelSize::new(short(f64::from(long) * ratio), long)
    }
}

/// Smallest uniform scale at which `source`, rotated by `radians` about its
/// center, covers an `output` rectangle with the same center.
///
/// The output rectangle seen from the source's rotated frame has the bounding
/// box `bw x bh`; the scaled source must be at least that large on each axis.
pub fn cover_scale(source: PixelSize, output: PixelSize, radians: f64) -> f64 {
    let (sw, sh) = (f64::from(source.width), f64::from(source.height));
    let (bw, bh) = rotated_bounds(output, radians);
    (bw / sw).max(bh / sh)
}

/// Pixels of rounding an in-range offset may pick up across a rotation.
const CLAMP_TOLERANCE: f64 = 1e-6;

fn rotated_bounds(output: PixelSize, radians: f64) -> (f64, f64) {
    let (ow, oh) = (f64::from(output.width), f64::from(output.height));
    let (c, s) = (radians.cos().abs(), radians.sin().abs());
    (ow * c + oh * s, ow * s + oh * c)
}

/// Resolved geometry for one render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub output: PixelSize,
    pub cover_scale: f64,
    /// `cover_scale` times the effective user scale.
    pub final_scale: f64,
    pub radians: f64,
    /// Offset of the source center from the output center, in output pixels.
    pub offset: Vec2,
    /// The transform actually placed, after cover enforcement. Composing it
    /// again, with or without cover, yields the same placement.
    pub applied: UserTransform,
    /// Source pixel space to output pixel space.
    pub to_output: Affine,
}

impl Placement {
    /// Compose the placement of `source` inside `output` under `transform`.
    ///
    /// With `enforce_cover` the user scale is floored at 1 and the translation
    /// is clamped so the scaled, rotated source still contains the whole
    /// output rectangle. Without it the transform is applied as given.
    pub fn compose(
        source: PixelSize,
        output: PixelSize,
        transform: &UserTransform,
        enforce_cover: bool,
    ) -> Result<Self> {
        transform.validate()?;
        if source.width == 0 || source.height == 0 {
            return Err(PipelineError::encode("source image has no pixels"));
        }

        let radians = transform.rotation_degrees.to_radians();
        let cover = cover_scale(source, output, radians);
        let user_scale = if enforce_cover { transform.scale.max(1.0) } else { transform.scale };
        let final_scale = cover * user_scale;

        let long = f64::from(output.long_edge());
        let mut offset = Vec2::new(transform.translation.x * long, transform.translation.y * long);
        let mut applied = UserTransform { scale: user_scale, ..*transform };
        if enforce_cover {
            if let Some(clamped) = clamp_offset(offset, source, output, radians, final_scale) {
                applied.translation.x = clamped.x / long;
                applied.translation.y = clamped.y / long;
                // Rebuild from the stored fractions so a later compose of
                // `applied` lands on the identical affine.
                offset = Vec2::new(applied.translation.x * long, applied.translation.y * long);
            }
        }

        let source_center = Vec2::new(f64::from(source.width) / 2.0, f64::from(source.height) / 2.0);
        let output_center = Vec2::new(f64::from(output.width) / 2.0, f64::from(output.height) / 2.0);
        let to_output = Affine::translate(output_center + offset)
            * Affine::rotate(radians)
            * Affine::scale(final_scale)
            * Affine::translate(-source_center);

        Ok(Self { output, cover_scale: cover, final_scale, radians, offset, applied, to_output })
    }

    /// Output pixel space to source pixel space.
    pub fn to_source(&self) -> Result<Affine> {
        let det = self.to_output.determinant();
        if !det.is_finite() || det.abs() < f64::EPSILON {
            return Err(PipelineError::encode("placement is not invertible"));
        }
        Ok(self.to_output.inverse())
    }
}

/// Keep the output rectangle inside the scaled source. The check is done in
/// the source's rotated frame against the output's bounding box there, which
/// is conservative for non-axis-aligned rotations. `None` means the offset is
/// already inside, give or take rounding.
fn clamp_offset(
    offset: Vec2,
    source: PixelSize,
    output: PixelSize,
    radians: f64,
    final_scale: f64,
) -> Option<Vec2> {
    let (bw, bh) = rotated_bounds(output, radians);
    let slack_x = ((final_scale * f64::from(source.width) - bw) / 2.0).max(0.0);
    let slack_y = ((final_scale * f64::from(source.height) - bh) / 2.0).max(0.0);

    let local = (Affine::rotate(-radians) * offset.to_point()).to_vec2();
    if local.x.abs() <= slack_x + CLAMP_TOLERANCE && local.y.abs() <= slack_y + CLAMP_TOLERANCE {
        return None;
    }
    let clamped = Vec2::new(local.x.clamp(-slack_x, slack_x), local.y.clamp(-slack_y, slack_y));
    Some((Affine::rotate(radians) * Point::new(clamped.x, clamped.y)).to_vec2())
}
