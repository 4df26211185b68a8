// Aspect-locked cover compositing.
//
// Rendering is a pure function of (source pixels, request): no clocks, no
// randomness, no threads. The same inputs always produce the same bytes.

pub mod encode;
pub mod geometry;

use image::{Rgba, RgbaImage};
use tessera_common::aspect::{AspectRatio, PixelSize};
use tessera_common::error::{PipelineError, Result};
use tessera_common::types::UserTransform;
use tracing::debug;

pub use encode::{decode, encode, Encoding};
pub use geometry::{output_size, Placement};

pub const DEFAULT_LONG_EDGE: u32 = 1600;
/// Largest output edge the compositor will allocate.
pub const MAX_OUTPUT_EDGE: u32 = 16_384;

/// Sample positions this far outside the source still count as inside.
const EDGE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub target: AspectRatio,
    pub max_pixels: Option<PixelSize>,
    /// `None` renders with the identity transform.
    pub transform: Option<UserTransform>,
    pub enforce_cover: bool,
}

impl RenderRequest {
    pub fn new(target: AspectRatio) -> Self {
        Self { target, max_pixels: None, transform: None, enforce_cover: true }
    }

    pub fn max_pixels(mut self, size: Option<PixelSize>) -> Self {
        self.max_pixels = size;
        self
    }

    pub fn transform(mut self, transform: UserTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn enforce_cover(mut self, enforce: bool) -> Self {
        self.enforce_cover = enforce;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    default_long_edge: u32,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(DEFAULT_LONG_EDGE)
    }
}

impl Compositor {
    pub fn new(default_long_edge: u32) -> Self {
        Self { default_long_edge: default_long_edge.max(1) }
    }

    pub fn output_size(&self, request: &RenderRequest) -> PixelSize {
        output_size(request.target, request.max_pixels, self.default_long_edge)
    }

    /// Resolve where a `source`-sized raster lands for `request` without
    /// rendering it. `Placement::applied` is the transform to persist.
    pub fn place(&self, source: PixelSize, request: &RenderRequest) -> Result<Placement> {
        let output = self.output_size(request);
        if output.long_edge() > MAX_OUTPUT_EDGE {
            return Err(PipelineError::encode(format!(
                "output {}x{} exceeds the {MAX_OUTPUT_EDGE}px edge limit",
                output.width, output.height
            )));
        }

        let transform = request.transform.unwrap_or(UserTransform::IDENTITY);
        Placement::compose(source, output, &transform, request.enforce_cover)
    }

    /// Render `source` into a new raster shaped by `request`.
    ///
    /// Output pixels whose center maps outside the source stay fully
    /// transparent; with `enforce_cover` there are none.
    pub fn render(&self, source: &RgbaImage, request: &RenderRequest) -> Result<RgbaImage> {
        let (sw, sh) = source.dimensions();
        let placement = self.place(PixelSize::new(sw, sh), request)?;
        let output = placement.output;
        let [a, b, c, d, e, f] = placement.to_source()?.as_coeffs();

        debug!(
            source = %format!("{sw}x{sh}"),
            output = %format!("{}x{}", output.width, output.height),
            cover = placement.cover_scale,
            scale = placement.final_scale,
            "rendering"
        );

        let sampler = Sampler::new(source);
        let mut raster = RgbaImage::new(output.width, output.height);
        for (x, y, pixel) in raster.enumerate_pixels_mut() {
            let px = f64::from(x) + 0.5;
            let py = f64::from(y) + 0.5;
            let sx = a * px + c * py + e;
            let sy = b * px + d * py + f;
            *pixel = sampler.sample(sx, sy);
        }
        Ok(raster)
    }
}

/// Bilinear sampling with clamp-to-edge and premultiplied blending.
struct Sampler<'a> {
    source: &'a RgbaImage,
    width: f64,
    height: f64,
}

impl<'a> Sampler<'a> {
    fn new(source: &'a RgbaImage) -> Self {
        let (w, h) = source.dimensions();
        Self { source, width: f64::from(w), height: f64::from(h) }
    }

    fn sample(&self, x: f64, y: f64) -> Rgba<u8> {
        let outside = x < -EDGE_EPSILON
            || y < -EDGE_EPSILON
            || x > self.width + EDGE_EPSILON
            || y > self.height + EDGE_EPSILON;
        if outside || !x.is_finite() || !y.is_finite() {
            return Rgba([0, 0, 0, 0]);
        }

        let u = x - 0.5;
        let v = y - 0.5;
        let x0 = u.floor();
        let y0 = v.floor();
        let fx = u - x0;
        let fy = v - y0;

        let taps = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1.0, y0, fx * (1.0 - fy)),
            (x0, y0 + 1.0, (1.0 - fx) * fy),
            (x0 + 1.0, y0 + 1.0, fx * fy),
        ];

        let mut premul = [0.0f64; 3];
        let mut alpha = 0.0f64;
        for (tx, ty, weight) in taps {
            let texel = self.texel(tx, ty);
            let a = f64::from(texel[3]) * weight;
            alpha += a;
            for (channel, value) in premul.iter_mut().zip(&texel[..3]) {
                *channel += f64::from(*value) * a;
            }
        }

        if alpha <= 0.0 {
            return Rgba([0, 0, 0, 0]);
        }
        let unpremul = |v: f64| (v / alpha).round().clamp(0.0, 255.0) as u8;
        Rgba([
            unpremul(premul[0]),
            unpremul(premul[1]),
            unpremul(premul[2]),
            alpha.round().clamp(0.0, 255.0) as u8,
        ])
    }

    fn texel(&self, x: f64, y: f64) -> [u8; 4] {
        let xi = x.clamp(0.0, self.width - 1.0) as u32;
        let yi = y.clamp(0.0, self.height - 1.0) as u32;
        self.source.get_pixel(xi, yi).0
    }
}
