// Target aspect ratios: presets, custom overrides, and slot dispatch.

use serde::{Deserialize, Serialize};

/// Output pixel dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn long_edge(self) -> u32 {
        self.width.max(self.height)
    }

    /// Parse `WIDTHxHEIGHT` (e.g. `2560x1440`).
    pub fn parse(input: &str) -> Option<Self> {
        let (w, h) = input.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse().ok()?;
        let height = h.trim().parse().ok()?;
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// A width:height ratio. Both components are kept as given so sidecars
/// round-trip the exact values the caller supplied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AspectRatio {
    pub width: f64,
    pub height: f64,
}

impl AspectRatio {
    pub const SQUARE: Self = Self { width: 1.0, height: 1.0 };

    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Collapse zero, negative and non-finite ratios to 1:1.
    pub fn normalized(self) -> Self {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if valid(self.width) && valid(self.height) {
            self
        } else {
            Self::SQUARE
        }
    }

    /// Width divided by height, after normalization.
    pub fn value(self) -> f64 {
        let n = self.normalized();
        n.width / n.height
    }

    /// Parse `W:H` (e.g. `16:9`, `2.35:1`).
    pub fn parse(input: &str) -> Option<Self> {
        let (w, h) = input.trim().split_once(':')?;
        Some(Self { width: w.trim().parse().ok()?, height: h.trim().parse().ok()? })
    }
}

impl From<PixelSize> for AspectRatio {
    fn from(size: PixelSize) -> Self {
        Self { width: f64::from(size.width), height: f64::from(size.height) }
    }
}

/// Closed set of slot presets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PresetKind {
    Thumbnail,
    Banner,
    HeroBanner,
    Poster,
    Icon,
}

impl PresetKind {
    pub const ALL: [PresetKind; 5] =
        [Self::Thumbnail, Self::Banner, Self::HeroBanner, Self::Poster, Self::Icon];

    pub fn ratio(self) -> AspectRatio {
        match self {
            Self::Thumbnail => AspectRatio::new(4.0, 3.0),
            Self::Banner => AspectRatio::new(4.0, 1.0),
            Self::HeroBanner => AspectRatio::new(16.0, 9.0),
            Self::Poster => AspectRatio::new(2.0, 3.0),
            Self::Icon => AspectRatio::SQUARE,
        }
    }

    /// Fixed pixel target for presets that ship at a known resolution.
    /// Everything else renders at the configured default density.
    pub fn pixel_target(self) -> Option<PixelSize> {
        match self {
            Self::HeroBanner => Some(PixelSize::new(2560, 1440)),
            Self::Banner => Some(PixelSize::new(2400, 600)),
            Self::Thumbnail | Self::Poster | Self::Icon => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Banner => "banner",
            Self::HeroBanner => "hero_banner",
            Self::Poster => "poster",
            Self::Icon => "icon",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let wanted = input.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|p| p.as_str() == wanted || wanted == p.as_str().replace('_', ""))
    }
}

/// What shape an image should take.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AspectSpec {
    Preset { preset: PresetKind },
    Ratio { width: f64, height: f64 },
    /// Use the source image's natural dimensions.
    Source,
}

impl AspectSpec {
    pub fn ratio(width: f64, height: f64) -> Self {
        Self::Ratio { width, height }
    }

    /// Resolve to a concrete ratio given the source's natural size.
    pub fn resolve(self, source: PixelSize) -> AspectRatio {
        match self {
            Self::Preset { preset } => preset.ratio(),
            Self::Ratio { width, height } => AspectRatio::new(width, height).normalized(),
            Self::Source => AspectRatio::from(source).normalized(),
        }
    }

    /// The override to record in a sidecar, if this aspect is not a preset.
    pub fn as_override(self, source: PixelSize) -> Option<AspectRatio> {
        match self {
            Self::Preset { .. } => None,
            other => Some(other.resolve(source)),
        }
    }
}

/// Default output encoding family for a slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    Lossy,
    Lossless,
}

/// Image slot variant: a known preset or a named freeform slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Preset(PresetKind),
    Custom(String),
}

/// Everything the compositor needs to know about a slot's output shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotTarget {
    pub aspect: AspectSpec,
    pub max_pixels: Option<PixelSize>,
    pub encoding: EncodingKind,
}

impl SlotKind {
    /// Map the slot variant to its output target. A record-level
    /// `custom_aspect` overrides the slot's own aspect but keeps its encoding;
    /// fixed preset pixel targets are dropped when the aspect is overridden.
    pub fn target(&self, custom_aspect: Option<AspectSpec>) -> SlotTarget {
        match (self, custom_aspect) {
            (Self::Preset(preset), None) => SlotTarget {
                aspect: AspectSpec::Preset { preset: *preset },
                max_pixels: preset.pixel_target(),
                encoding: EncodingKind::Lossy,
            },
            (Self::Preset(_), Some(aspect)) => {
                SlotTarget { aspect, max_pixels: None, encoding: EncodingKind::Lossy }
            }
            (Self::Custom(_), aspect) => SlotTarget {
                aspect: aspect.unwrap_or(AspectSpec::Source),
                max_pixels: None,
                encoding: EncodingKind::Lossless,
            },
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Preset(preset) => preset.as_str(),
            Self::Custom(name) => name,
        }
    }
}
