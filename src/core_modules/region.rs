// THEORY:
// The `region` module turns a caller's normalized selection into a concrete block
// of pixels. It is the bridge between what the user drew on screen and what the
// severity scorer analyses.
//
// Key architectural principles:
// 1.  **Normalized Input**: A `SelectionRect` is expressed in `[0, 1]` relative to
//     the source image, so it survives any display scaling on the caller's side.
//     `None` means "the whole image".
// 2.  **Copy, Never Alias**: The extracted region is a fresh `PixelGrid`. The source
//     buffer is only read.
// 3.  **Stable Size**: The region is always `max(1, round(w * W))` by
//     `max(1, round(h * H))` pixels (capped at the image size). When rounding would
//     push the region past the right or bottom edge, it is shifted back inside
//     rather than shrunk.

use crate::core_modules::pixel::pixel::CHANNELS;
use crate::core_modules::pixel_grid::PixelGrid;
use crate::errors::RegionError;
use serde::{Deserialize, Serialize};

/// Slack allowed on `x + width` and `y + height` for selections that come from
/// floating point UI math.
const EDGE_TOLERANCE: f64 = 1e-6;

/// A normalized rectangle relative to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SelectionRect {
    pub const FULL: SelectionRect = SelectionRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn validate(&self) -> Result<(), RegionError> {
        let fields = [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(invalid(format!("{name} is not a finite number")));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} = {value} is outside [0, 1]")));
            }
        }
        if self.x + self.width > 1.0 + EDGE_TOLERANCE {
            return Err(invalid(format!(
                "x + width = {} extends past the right edge",
                self.x + self.width
            )));
        }
        if self.y + self.height > 1.0 + EDGE_TOLERANCE {
            return Err(invalid(format!(
                "y + height = {} extends past the bottom edge",
                self.y + self.height
            )));
        }
        Ok(())
    }
}

impl Default for SelectionRect {
    fn default() -> Self {
        Self::FULL
    }
}

fn invalid(reason: String) -> RegionError {
    RegionError::InvalidSelection { reason }
}

/// Pixel-space rectangle addressed by a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Maps a normalized selection onto a grid of `grid_width` x `grid_height` pixels.
pub fn pixel_rect(rect: &SelectionRect, grid_width: u32, grid_height: u32) -> PixelRect {
    let (x, width) = map_axis(rect.x, rect.width, grid_width);
    let (y, height) = map_axis(rect.y, rect.height, grid_height);
    PixelRect {
        x,
        y,
        width,
        height,
    }
}

fn map_axis(start: f64, extent: f64, size: u32) -> (u32, u32) {
    if size == 0 {
        return (0, 0);
    }
    let length = ((extent * size as f64).round() as u32).max(1).min(size);
    let offset = ((start * size as f64).round() as u32).min(size - length);
    (offset, length)
}

/// Copies the pixels addressed by `rect` (or the whole image for `None`) into a new grid.
pub fn extract_region(
    grid: &PixelGrid,
    rect: Option<&SelectionRect>,
) -> Result<PixelGrid, RegionError> {
    let rect = rect.copied().unwrap_or(SelectionRect::FULL);
    rect.validate()?;

    let area = pixel_rect(&rect, grid.width(), grid.height());
    let source = grid.pixels();
    let row_bytes = area.width as usize * CHANNELS;
    let mut pixels = Vec::with_capacity(row_bytes * area.height as usize);

    for row in area.y..area.y + area.height {
        let start = (row as usize * grid.width() as usize + area.x as usize) * CHANNELS;
        if let Some(bytes) = source.get(start..start + row_bytes) {
            pixels.extend_from_slice(bytes);
        }
    }

    PixelGrid::from_rgba(area.width, area.height, pixels).map_err(|err| RegionError::InvalidSelection {
        reason: err.to_string(),
    })
}
