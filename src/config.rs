use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use image::Rgba;
use serde::Deserialize;

use crate::error::Error;
use crate::processing::color::{self, DARK_GREEN, DARK_RED, LIGHT_GRAY};
use crate::processing::layout::GridGeometry;
use crate::processing::slice::ImageSource;
use crate::render::tile::Face;

/// Side length used when the host has not constrained the view, in
/// density-independent pixels.
pub const DEFAULT_SIZE_DP: f32 = 150.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Grid resolution per axis.
    pub squares_per_row: u32,
    /// Pixels left empty between neighbouring tiles.
    pub margin_between: u32,
    /// Flip speed: progress added per rendered frame.
    pub step_size: u32,
    /// Fill painted behind the tiles every frame.
    pub background_color: [u8; 3],
    /// Upper bound of the per-tile random flip stagger, in ms.
    pub max_start_delay_ms: u64,
    /// Image shown on the front faces.
    pub front_image: Option<PathBuf>,
    /// Image shown on the back faces.
    pub back_image: Option<PathBuf>,
    /// When false faces swap without the rotated frames.
    pub animation_enabled: bool,
    /// Side length of the square view in pixels.
    pub view_width: Option<u32>,
    /// Physical pixels per density-independent pixel.
    pub display_density: f32,
    /// Front face color when no front image is usable.
    pub front_fallback_color: [u8; 3],
    /// Back face color when no back image is usable.
    pub back_fallback_color: [u8; 3],
    /// Face the grid shows before the first flip.
    pub initial_face: Face,
    /// Memory budget for cached slices.
    pub cache_budget_bytes: usize,
    /// Minimum time between two rendered frames.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// Optional deterministic seed for the flip stagger.
    pub stagger_seed: Option<u64>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.squares_per_row >= 1,
            "squares-per-row must be at least one"
        );
        ensure!(self.step_size >= 1, "step-size must be at least one");
        ensure!(
            self.display_density.is_finite() && self.display_density > 0.0,
            "display-density must be positive"
        );
        ensure!(
            self.cache_budget_bytes > 0,
            "cache-budget-bytes must be greater than zero"
        );
        ensure!(
            self.frame_interval > Duration::ZERO,
            "frame-interval must be positive"
        );
        self.grid()
            .geometry()
            .context("grid does not fit the view width")?;
        Ok(self)
    }

    /// Immutable snapshot consumed by one preparation job.
    pub fn grid(&self) -> GridConfig {
        GridConfig {
            squares_per_row: self.squares_per_row,
            margin_between: self.margin_between,
            view_width: self.view_width,
            default_width: (DEFAULT_SIZE_DP * self.display_density).round().max(1.0) as u32,
            step_size: self.step_size,
            max_start_delay: Duration::from_millis(self.max_start_delay_ms),
            animation_enabled: self.animation_enabled,
            initial_face: self.initial_face,
            front_image: self.front_image.clone().map(ImageSource::Path),
            back_image: self.back_image.clone().map(ImageSource::Path),
            front_fallback: color::opaque(self.front_fallback_color),
            back_fallback: color::opaque(self.back_fallback_color),
        }
    }

    pub fn render(&self) -> RenderSettings {
        RenderSettings {
            background: color::opaque(self.background_color),
            frame_interval: self.frame_interval,
            stagger_seed: self.stagger_seed,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            squares_per_row: 4,
            margin_between: 0,
            step_size: 6,
            background_color: LIGHT_GRAY,
            max_start_delay_ms: 1100,
            front_image: None,
            back_image: None,
            animation_enabled: true,
            view_width: None,
            display_density: 1.0,
            front_fallback_color: DARK_RED,
            back_fallback_color: DARK_GREEN,
            initial_face: Face::Front,
            cache_budget_bytes: 5 * 1024 * 1024,
            frame_interval: Duration::from_millis(16),
            stagger_seed: None,
        }
    }
}

/// Everything a preparation job needs to build one tile list.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub squares_per_row: u32,
    pub margin_between: u32,
    pub view_width: Option<u32>,
    pub default_width: u32,
    pub step_size: u32,
    pub max_start_delay: Duration,
    pub animation_enabled: bool,
    pub initial_face: Face,
    pub front_image: Option<ImageSource>,
    pub back_image: Option<ImageSource>,
    pub front_fallback: Rgba<u8>,
    pub back_fallback: Rgba<u8>,
}

impl GridConfig {
    pub fn resolved_width(&self) -> u32 {
        self.view_width.unwrap_or(self.default_width)
    }

    pub fn geometry(&self) -> Result<GridGeometry, Error> {
        GridGeometry::new(
            self.resolved_width(),
            self.squares_per_row,
            self.margin_between,
        )
    }

    /// Same geometry and timing with a different face assignment.
    pub fn with_faces(
        &self,
        front_image: Option<ImageSource>,
        back_image: Option<ImageSource>,
        initial_face: Face,
    ) -> Self {
        Self {
            front_image,
            back_image,
            initial_face,
            ..self.clone()
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Configuration::default().grid()
    }
}

/// Settings owned by the render loop rather than the preparation jobs.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub background: Rgba<u8>,
    pub frame_interval: Duration,
    pub stagger_seed: Option<u64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Configuration::default().render()
    }
}
