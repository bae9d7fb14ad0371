//! Scalar height fields derived from RGB rasters.

use crate::parse::ppm::RasterImage;

/// Luminance weights in percent (R, G, B). Integer weights keep the
/// truncation exact: pure white maps to 255, not 254.
const LUMA_WEIGHTS: [u32; 3] = [30, 59, 11];

/// Row-major grid of normalized samples in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeightField {
    width: usize,
    height: usize,
    samples: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("height field {width}x{height} does not match {sample_count} samples")]
pub struct HeightFieldDimensionError {
    pub width: usize,
    pub height: usize,
    pub sample_count: usize,
}

impl HeightField {
    /// Builds a field from precomputed samples.
    pub fn new(
        width: usize,
        height: usize,
        samples: Vec<f64>,
    ) -> Result<Self, HeightFieldDimensionError> {
        if width.checked_mul(height) != Some(samples.len()) {
            return Err(HeightFieldDimensionError {
                width,
                height,
                sample_count: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Converts every raster pixel to its luminance, normalized by 255.
    ///
    /// An empty raster yields an empty field.
    #[must_use]
    pub fn from_raster(image: &RasterImage) -> Self {
        if image.is_empty() {
            return Self::default();
        }

        let samples = image
            .channels
            .chunks_exact(3)
            .take(image.pixel_count())
            .map(|rgb| f64::from(luminance(rgb[0], rgb[1], rgb[2])) / 255.0)
            .collect();

        Self {
            width: image.width,
            height: image.height,
            samples,
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn sample(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.samples.get(row * self.width + col).copied()
    }

    /// Nearest-lower sample at normalized coordinates: column
    /// `floor(u * (width - 1))`, row `floor(v * (height - 1))`.
    ///
    /// `None` for an empty field or coordinates outside `[0, 1]`.
    #[must_use]
    pub fn sample_uv(&self, u: f64, v: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return None;
        }
        let col = (u * (self.width - 1) as f64).floor() as usize;
        let row = (v * (self.height - 1) as f64).floor() as usize;
        self.sample(col, row)
    }
}

/// `0.30 R + 0.59 G + 0.11 B`, truncated to an integer in `[0, 255]`.
#[must_use]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let weighted = LUMA_WEIGHTS[0] * u32::from(r)
        + LUMA_WEIGHTS[1] * u32::from(g)
        + LUMA_WEIGHTS[2] * u32::from(b);
    // Weights sum to 100, so the quotient never exceeds 255.
    (weighted / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(width: usize, height: usize, channels: Vec<u8>) -> RasterImage {
        RasterImage {
            width,
            height,
            max_sample: 255,
            channels,
        }
    }

    #[test]
    fn white_black_and_red() {
        let image = raster(3, 1, vec![255, 255, 255, 0, 0, 0, 255, 0, 0]);
        let field = HeightField::from_raster(&image);

        assert_eq!(field.width(), 3);
        assert_eq!(field.height(), 1);
        assert!((field.samples()[0] - 1.0).abs() < 1e-12);
        assert!(field.samples()[1].abs() < 1e-12);
        // trunc(76.5) = 76
        assert!((field.samples()[2] - 76.0 / 255.0).abs() < 1e-12);
        assert!((field.samples()[2] - 0.30).abs() < 0.005);
    }

    #[test]
    fn pure_green_and_blue_weights() {
        assert_eq!(luminance(0, 255, 0), 150);
        assert_eq!(luminance(0, 0, 255), 28);
        assert_eq!(luminance(128, 128, 128), 128);
    }

    #[test]
    fn index_matches_raster_layout() {
        let mut channels = vec![0u8; 2 * 2 * 3];
        // pixel (col 1, row 1) is white
        channels[9..12].copy_from_slice(&[255, 255, 255]);
        let field = HeightField::from_raster(&raster(2, 2, channels));
        assert_eq!(field.sample(1, 1), Some(1.0));
        assert_eq!(field.sample(0, 1), Some(0.0));
        assert_eq!(field.sample(2, 0), None);
    }

    #[test]
    fn uv_sampling_takes_the_lower_neighbour() {
        let field = HeightField::new(3, 2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).unwrap();
        assert_eq!(field.sample_uv(0.0, 0.0), Some(0.0));
        // 0.99 * 2 = 1.98 -> column 1
        assert_eq!(field.sample_uv(0.99, 0.0), Some(0.1));
        assert_eq!(field.sample_uv(1.0, 1.0), Some(0.5));
        assert_eq!(field.sample_uv(0.5, 0.5), Some(0.1));
        assert_eq!(field.sample_uv(1.01, 0.0), None);
        assert_eq!(HeightField::default().sample_uv(0.0, 0.0), None);
    }

    #[test]
    fn empty_raster_gives_empty_field() {
        let field = HeightField::from_raster(&RasterImage::empty());
        assert!(field.is_empty());
        assert_eq!(field.width(), 0);
        assert!(field.samples().is_empty());
    }

    #[test]
    fn new_validates_sample_count() {
        assert!(HeightField::new(2, 2, vec![0.0; 4]).is_ok());
        let err = HeightField::new(2, 2, vec![0.0; 3]).unwrap_err();
        assert_eq!(err.sample_count, 3);
    }
}
