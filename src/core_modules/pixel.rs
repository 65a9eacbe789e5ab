// THEORY:
// The `Pixel` module is the most fundamental building block of the scan engine.
// It is a "dumb" data container for the raw RGBA data of a single pixel, plus the
// handful of single-pixel heuristics the severity scorer needs.
//
// Key architectural principles:
// 1.  **Data Purity**: It holds the raw `u8` channel values without any interpretation.
// 2.  **Intrinsic Knowledge**: `luminance` is computed from the pixel's own channels
//     only. Anything that needs neighbours (gradients, edges) lives in `severity`.
// 3.  **Efficiency**: It is `Copy`, so reading pixels out of a `PixelGrid` never
//     allocates.

pub mod pixel {
    pub type Channel = u8;
    pub type Luminance = f64;

    pub const CHANNELS: usize = 4;

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
        /// The alpha (transparency) channel value (0-255).
        pub alpha: Channel,
    }

    impl Pixel {
        pub const fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Self {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// Luminance estimate (Rec. 601 luma).
        ///
        /// - Interprets perceived brightness as a weighted sum of RGB.
        /// - Alpha is ignored.
        pub fn luminance(&self) -> Luminance {
            0.299_f64 * self.red as f64 + 0.587_f64 * self.green as f64 + 0.114_f64 * self.blue as f64
        }

        pub fn to_bytes(self) -> [u8; CHANNELS] {
            [self.red, self.green, self.blue, self.alpha]
        }
    }

    /// Builds a pixel from the first four bytes of an RGBA slice.
    /// Missing channels read as zero, a missing alpha as fully opaque.
    impl From<&[u8]> for Pixel {
        fn from(bytes: &[u8]) -> Self {
            let channel = |i: usize| bytes.get(i).copied().unwrap_or(0);
            Pixel {
                red: channel(0),
                green: channel(1),
                blue: channel(2),
                alpha: bytes.get(3).copied().unwrap_or(u8::MAX),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn luminance_of_black_and_white() {
        assert_eq!(Pixel::new(0, 0, 0, 255).luminance(), 0.0);
        let white = Pixel::new(255, 255, 255, 255).luminance();
        assert!((white - 255.0).abs() < 1e-9);
    }

    #[test]
    fn luminance_weights_green_highest() {
        let red = Pixel::new(100, 0, 0, 255).luminance();
        let green = Pixel::new(0, 100, 0, 255).luminance();
        let blue = Pixel::new(0, 0, 100, 255).luminance();
        assert!((red - 29.9).abs() < 1e-9);
        assert!((green - 58.7).abs() < 1e-9);
        assert!((blue - 11.4).abs() < 1e-9);
    }

    #[test]
    fn from_short_slice_fills_defaults() {
        let pixel = Pixel::from(&[10u8, 20, 30][..]);
        assert_eq!(pixel, Pixel::new(10, 20, 30, 255));
    }
}
