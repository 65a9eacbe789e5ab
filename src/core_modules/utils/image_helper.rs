// THEORY:
// Helpers for turning grids back into image files. The scan itself never writes
// anything; these exist so a caller (the demo runner, a UI) can show what the
// detector found by outlining each detection box on a copy of the photo.

pub mod image_helper {
    use crate::core_modules::detection::Detection;
    use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
    use crate::core_modules::pixel_grid::PixelGrid;
    use image::ImageEncoder;
    use std::path::Path;

    /// Outline colour for detection boxes.
    pub const BOX_COLOR: Pixel = Pixel::new(255, 64, 32, 255);
    const BOX_THICKNESS: u32 = 2;

    /// Encodes a grid as PNG bytes.
    pub fn encode_png(grid: &PixelGrid) -> Result<Vec<u8>, image::error::ImageError> {
        let mut output = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut output);
        encoder.write_image(
            grid.pixels(),
            grid.width(),
            grid.height(),
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(output)
    }

    /// Writes a grid to `path` as a PNG file.
    pub fn save_png(path: &Path, grid: &PixelGrid) -> Result<(), image::error::ImageError> {
        let bytes = encode_png(grid)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Returns a copy of `grid` with every detection box outlined.
    pub fn annotate(grid: &PixelGrid, detections: &[Detection]) -> PixelGrid {
        let width = grid.width();
        let height = grid.height();
        let mut buffer = grid.pixels().to_vec();
        if width == 0 || height == 0 {
            return grid.clone();
        }

        let color = BOX_COLOR.to_bytes();
        let mut paint = |x: u32, y: u32| {
            let start = (y as usize * width as usize + x as usize) * CHANNELS;
            if let Some(target) = buffer.get_mut(start..start + CHANNELS) {
                target.copy_from_slice(&color);
            }
        };

        for detection in detections {
            let bbox = detection.bbox;
            let x0 = (bbox.x.max(0.0).round() as u32).min(width - 1);
            let y0 = (bbox.y.max(0.0).round() as u32).min(height - 1);
            let x1 = ((bbox.x + bbox.width).max(0.0).round() as u32).clamp(x0 + 1, width) - 1;
            let y1 = ((bbox.y + bbox.height).max(0.0).round() as u32).clamp(y0 + 1, height) - 1;

            for t in 0..BOX_THICKNESS {
                for x in x0..=x1 {
                    paint(x, (y0 + t).min(y1));
                    paint(x, y1.saturating_sub(t).max(y0));
                }
                for y in y0..=y1 {
                    paint((x0 + t).min(x1), y);
                    paint(x1.saturating_sub(t).max(x0), y);
                }
            }
        }

        // Length is unchanged, so the buffer always matches the dimensions.
        PixelGrid::from_rgba(width, height, buffer).unwrap_or_else(|_| grid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::image_helper::*;
    use crate::core_modules::detection::{BoundingBox, Detection};
    use crate::core_modules::pixel::pixel::Pixel;
    use crate::core_modules::pixel_grid::{PixelGrid, decode};

    #[test]
    fn encode_white_grid() {
        let grid = PixelGrid::filled(50, 40, Pixel::new(255, 255, 255, 255));
        let bytes = encode_png(&grid).expect("Error Encoding Grid.");
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(decode(&bytes, "image/png").unwrap(), grid);
    }

    #[test]
    fn annotate_outlines_the_box_only() {
        let grid = PixelGrid::filled(20, 20, Pixel::new(0, 0, 0, 255));
        let detections = [Detection {
            label: "car".into(),
            confidence: 90,
            bbox: BoundingBox::new(4.0, 4.0, 10.0, 8.0),
        }];

        let annotated = annotate(&grid, &detections);

        assert_eq!(annotated.pixel(4, 4), Some(BOX_COLOR));
        assert_eq!(annotated.pixel(13, 11), Some(BOX_COLOR));
        assert_eq!(annotated.pixel(5, 5), Some(BOX_COLOR));
        assert_eq!(annotated.pixel(8, 8), Some(Pixel::new(0, 0, 0, 255)));
        assert_eq!(annotated.pixel(0, 0), Some(Pixel::new(0, 0, 0, 255)));
        // The source grid is untouched.
        assert_eq!(grid.pixel(4, 4), Some(Pixel::new(0, 0, 0, 255)));
    }

    #[test]
    fn annotate_clips_boxes_to_the_image() {
        let grid = PixelGrid::filled(10, 10, Pixel::new(0, 0, 0, 255));
        let detections = [Detection {
            label: "truck".into(),
            confidence: 82,
            bbox: BoundingBox::new(-5.0, 6.0, 40.0, 40.0),
        }];

        let annotated = annotate(&grid, &detections);

        assert_eq!(annotated.pixel(0, 6), Some(BOX_COLOR));
        assert_eq!(annotated.pixel(9, 9), Some(BOX_COLOR));
        assert_eq!(annotated.pixel(5, 0), Some(Pixel::new(0, 0, 0, 255)));
    }
}
