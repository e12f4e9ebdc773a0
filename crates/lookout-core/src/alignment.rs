//! Face alignment to the canonical 112×112 ArcFace crop.
//!
//! A 4-DOF similarity (scale, rotation, translation) is fitted from the five
//! detected landmarks to the InsightFace reference positions in closed form,
//! then the face is resampled with bilinear interpolation.

use crate::types::BoundingBox;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + t`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit of `src` onto `dst`.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / 5.0, sy / 5.0)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (px, py) = (s.0 - msx, s.1 - msy);
            let (qx, qy) = (d.0 - mdx, d.1 - mdy);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }

        if norm < 1e-12 {
            // Degenerate landmarks: translate only
            return Self { a: 1.0, b: 0.0, tx: mdx - msx, ty: mdy - msy };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    /// Map `side`×`side` around the box centre onto the output square.
    fn for_box(face: &BoundingBox, out_size: u32) -> Self {
        let side = face.width.max(face.height).max(1.0);
        let a = out_size as f32 / side;
        let left = face.x + face.width / 2.0 - side / 2.0;
        let top = face.y + face.height / 2.0 - side / 2.0;
        Self { a, b: 0.0, tx: -left * a, ty: -top * a }
    }

    #[cfg(test)]
    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Resample `image` into an `out_size` square through the inverse transform.
    fn warp(&self, image: &RgbImage, out_size: u32) -> RgbImage {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return RgbImage::new(out_size, out_size);
        }
        let (ia, ib) = (self.a / det, self.b / det);

        RgbImage::from_fn(out_size, out_size, |ox, oy| {
            let dx = ox as f32 - self.tx;
            let dy = oy as f32 - self.ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;
            bilinear(image, sx, sy)
        })
    }
}

/// Sample with bilinear interpolation; outside pixels are black.
fn bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let (w, h) = (image.width() as i64, image.height() as i64);

    let sample = |px: i64, py: i64, c: usize| -> f32 {
        if px >= 0 && px < w && py >= 0 && py < h {
            image.get_pixel(px as u32, py as u32)[c] as f32
        } else {
            0.0
        }
    };

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
            + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
            + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
            + sample(x0 + 1, y0 + 1, c) * fx * fy;
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Produce the 112×112 crop the recognizer expects.
///
/// Uses the landmarks when the detector supplied them, otherwise a square crop
/// centred on the box.
pub fn align_face(image: &RgbImage, face: &BoundingBox) -> RgbImage {
    let transform = match &face.landmarks {
        Some(landmarks) => Similarity::fit(landmarks, &REFERENCE_LANDMARKS_112),
        None => Similarity::for_box(face, ALIGNED_SIZE),
    };
    transform.warp(image, ALIGNED_SIZE)
}
