//! Image quality metrics for judging reference and probe photos.

use image::RgbImage;
use serde::Serialize;

/// Mean luma below this is reported as too dark.
pub const DARK_BRIGHTNESS: f32 = 50.0;
/// Mean luma above this is reported as overexposed.
pub const BRIGHT_BRIGHTNESS: f32 = 200.0;
/// Laplacian variance below this is reported as blurry.
pub const BLURRY_SHARPNESS: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageQuality {
    /// Mean luma (0.0–255.0).
    pub brightness: f32,
    /// Standard deviation of luma.
    pub contrast: f32,
    /// Variance of the 4-neighbour Laplacian.
    pub sharpness: f32,
    /// `contrast * sharpness / 10000`.
    pub quality_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityAdvice {
    TooDark,
    Overexposed,
    Blurry,
}

impl std::fmt::Display for QualityAdvice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            QualityAdvice::TooDark => "image too dark: add light",
            QualityAdvice::Overexposed => "image overexposed: reduce light",
            QualityAdvice::Blurry => "image blurry: hold still or use a better camera",
        };
        f.write_str(text)
    }
}

impl ImageQuality {
    pub fn measure(image: &RgbImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let luma: Vec<f32> = image
            .pixels()
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .collect();

        let (brightness, variance) = mean_and_variance(&luma);
        let contrast = variance.sqrt();

        let mut lap = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                // Border pixels are mirrored, as OpenCV's default border does
                let at = |dx: isize, dy: isize| {
                    let xx = reflect(x as isize + dx, w);
                    let yy = reflect(y as isize + dy, h);
                    luma[yy * w + xx]
                };
                lap.push(at(-1, 0) + at(1, 0) + at(0, -1) + at(0, 1) - 4.0 * at(0, 0));
            }
        }
        let (_, sharpness) = mean_and_variance(&lap);

        Self {
            brightness,
            contrast,
            sharpness,
            quality_score: contrast * sharpness / 10_000.0,
        }
    }

    pub fn advice(&self) -> Vec<QualityAdvice> {
        let mut out = Vec::new();
        if self.brightness < DARK_BRIGHTNESS {
            out.push(QualityAdvice::TooDark);
        } else if self.brightness > BRIGHT_BRIGHTNESS {
            out.push(QualityAdvice::Overexposed);
        }
        if self.sharpness < BLURRY_SHARPNESS {
            out.push(QualityAdvice::Blurry);
        }
        out
    }
}

fn reflect(i: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    let r = if i < 0 {
        -i
    } else if i >= len {
        2 * len - 2 - i
    } else {
        i
    };
    r.clamp(0, len - 1) as usize
}

fn mean_and_variance(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_uniform_image() {
        let img = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let q = ImageQuality::measure(&img);
        assert!((q.brightness - 128.0).abs() < 0.01);
        assert!(q.contrast < 1e-3);
        assert!(q.sharpness < 1e-3);
        assert_eq!(q.advice(), vec![QualityAdvice::Blurry]);
    }

    #[test]
    fn test_dark_and_bright() {
        let dark = ImageQuality::measure(&RgbImage::from_pixel(4, 4, Rgb([10, 10, 10])));
        assert!(dark.advice().contains(&QualityAdvice::TooDark));
        let bright = ImageQuality::measure(&RgbImage::from_pixel(4, 4, Rgb([250, 250, 250])));
        assert!(bright.advice().contains(&QualityAdvice::Overexposed));
    }

    #[test]
    fn test_checkerboard_is_sharp() {
        let img = RgbImage::from_fn(16, 16, |x, y| {
            if (x + y) % 2 == 0 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let q = ImageQuality::measure(&img);
        assert!((q.brightness - 127.5).abs() < 0.5);
        assert!(q.contrast > 100.0);
        assert!(q.sharpness > BLURRY_SHARPNESS);
        assert!(q.quality_score > 0.0);
        assert!(!q.advice().contains(&QualityAdvice::Blurry));
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-1, 1), 0);
    }
}
