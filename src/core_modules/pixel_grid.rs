// THEORY:
// The `PixelGrid` is the image ingestor's output and the common currency of every
// other component. It is an immutable width/height/RGBA-buffer triple. Nothing
// mutates a grid after it is built; derived grids (regions, annotated copies) are
// new, independent allocations.
//
// Decoding is delegated to the `image` crate and restricted to the two formats the
// scan surface accepts. A failed decode never yields a partial grid.

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::errors::IngestError;
use image::ImageFormat;

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

/// A decoded image: dimensions plus a flattened, row-major RGBA buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelGrid {
    /// Wraps a raw RGBA buffer. The buffer length must be `width * height * 4`.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, IngestError> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(IngestError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A grid where every pixel has the same value.
    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Self {
        let count = width as usize * height as usize;
        let pixels = pixel.to_bytes().repeat(count);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Returns the pixel at `(x, y)`, or `None` outside the grid.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Pixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.pixels
            .get(start..start + CHANNELS)
            .map(Pixel::from)
    }

    /// Iterates over every pixel in row-major order.
    pub fn iter_pixels(&self) -> impl Iterator<Item = Pixel> + '_ {
        self.pixels.chunks_exact(CHANNELS).map(Pixel::from)
    }
}

/// Decodes JPEG or PNG bytes into a `PixelGrid`.
///
/// The mime type decides the decoder; anything other than `image/jpeg` or
/// `image/png` fails with `UnsupportedFormat` before the bytes are touched.
pub fn decode(bytes: &[u8], mime_type: &str) -> Result<PixelGrid, IngestError> {
    let format = match mime_type.trim().to_ascii_lowercase().as_str() {
        MIME_JPEG => ImageFormat::Jpeg,
        MIME_PNG => ImageFormat::Png,
        _ => {
            return Err(IngestError::UnsupportedFormat {
                mime_type: mime_type.to_string(),
            });
        }
    };

    let image = image::load_from_memory_with_format(bytes, format).map_err(IngestError::Decode)?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    PixelGrid::from_rgba(width, height, rgba.into_raw())
}

/// Guesses the mime type from a file extension, for callers that only have a path.
pub fn mime_from_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some(MIME_JPEG),
        "png" => Some(MIME_PNG),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::utils::image_helper::image_helper::encode_png;

    fn checkerboard(width: u32, height: u32) -> PixelGrid {
        let mut buffer = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 0 } else { 255 };
                buffer.extend_from_slice(&[v, v, v, 255]);
            }
        }
        PixelGrid::from_rgba(width, height, buffer).expect("valid buffer")
    }

    #[test]
    fn decode_png_round_trips_pixels() {
        let grid = checkerboard(6, 4);
        let bytes = encode_png(&grid).expect("encode");

        let decoded = decode(&bytes, "image/png").expect("decode");

        assert_eq!(decoded, grid);
    }

    #[test]
    fn decode_rejects_unsupported_mime_type() {
        let bytes = encode_png(&checkerboard(2, 2)).expect("encode");

        let err = decode(&bytes, "image/gif").unwrap_err();

        assert!(matches!(err, IngestError::UnsupportedFormat { ref mime_type } if mime_type == "image/gif"));
    }

    #[test]
    fn decode_reports_corrupt_data() {
        let err = decode(&[0u8, 1, 2, 3], "image/jpeg").unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
    }

    #[test]
    fn from_rgba_checks_buffer_length() {
        let err = PixelGrid::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, IngestError::BufferSize { expected: 16, actual: 15 }));
    }

    #[test]
    fn pixel_lookup_is_row_major() {
        let grid = checkerboard(3, 3);
        assert_eq!(grid.pixel(0, 0), Some(Pixel::new(0, 0, 0, 255)));
        assert_eq!(grid.pixel(1, 0), Some(Pixel::new(255, 255, 255, 255)));
        assert_eq!(grid.pixel(3, 0), None);
        assert_eq!(grid.iter_pixels().count(), 9);
    }

    #[test]
    fn mime_guess_from_extension() {
        assert_eq!(mime_from_extension("JPG"), Some(MIME_JPEG));
        assert_eq!(mime_from_extension("png"), Some(MIME_PNG));
        assert_eq!(mime_from_extension("webp"), None);
    }
}
