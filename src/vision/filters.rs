//! Low-level image filters used by the preprocessor.
//!
//! All filters operate on `image::GrayImage` buffers and are deterministic.

use image::{GrayImage, RgbImage};

/// How samples outside the image are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// `gfedcb|abcdefgh|gfedcba`
    Reflect101,
    /// `aaaaaa|abcdefgh|hhhhhhh`
    Replicate,
}

impl BorderMode {
    #[inline]
    fn resolve(self, index: isize, len: usize) -> usize {
        let n = len as isize;
        if n <= 1 {
            return 0;
        }
        match self {
            BorderMode::Replicate => index.clamp(0, n - 1) as usize,
            BorderMode::Reflect101 => {
                let period = 2 * (n - 1);
                let mut i = index.rem_euclid(period);
                if i >= n {
                    i = period - i;
                }
                i as usize
            }
        }
    }
}

/// 256-entry gamma lookup table, `out = 255 * (in / 255)^(1 / gamma)`.
pub fn gamma_lut(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((i as f64 / 255.0).powf(inv) * 255.0) as u8;
    }
    table
}

/// Apply a lookup table to every channel of an RGB image.
pub fn apply_lut(image: &RgbImage, lut: &[u8; 256]) -> RgbImage {
    let mut out = image.clone();
    for v in out.iter_mut() {
        *v = lut[*v as usize];
    }
    out
}

/// Luma plane (ITU-R BT.601), the Y channel of a YUV conversion.
pub fn luma(image: &RgbImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = GrayImage::new(w, h);
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        let [r, g, b] = src.0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        dst.0[0] = y.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Normalized 1-D Gaussian kernel of odd length `size`.
///
/// A non-positive `sigma` is derived from the size as
/// `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let half = (size / 2) as f64;
    let scale = -0.5 / (sigma * sigma);
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - half;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| (v / sum) as f32).collect()
}

/// Separable convolution with the same kernel along both axes.
pub fn separable_filter(image: &GrayImage, kernel: &[f32], border: BorderMode) -> GrayImage {
    let (w, h) = image.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    if wu == 0 || hu == 0 {
        return image.clone();
    }
    let half = (kernel.len() / 2) as isize;
    let src = image.as_raw();

    let mut horizontal = vec![0f32; wu * hu];
    for y in 0..hu {
        let row = &src[y * wu..(y + 1) * wu];
        let dst = &mut horizontal[y * wu..(y + 1) * wu];
        for (x, out) in dst.iter_mut().enumerate() {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = border.resolve(x as isize + k as isize - half, wu);
                acc += weight * row[sx] as f32;
            }
            *out = acc;
        }
    }

    let mut out = GrayImage::new(w, h);
    let dst: &mut [u8] = &mut out;
    let mut acc = vec![0f32; wu];
    for y in 0..hu {
        acc.iter_mut().for_each(|a| *a = 0.0);
        for (k, weight) in kernel.iter().enumerate() {
            let sy = border.resolve(y as isize + k as isize - half, hu);
            let row = &horizontal[sy * wu..(sy + 1) * wu];
            for (a, v) in acc.iter_mut().zip(row) {
                *a += weight * v;
            }
        }
        for (x, a) in acc.iter().enumerate() {
            dst[y * wu + x] = a.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Gaussian blur with a square `size × size` kernel.
pub fn gaussian_blur(image: &GrayImage, size: usize, sigma: f64, border: BorderMode) -> GrayImage {
    separable_filter(image, &gaussian_kernel(size, sigma), border)
}

/// Binary adaptive threshold against a Gaussian-weighted local mean.
///
/// A pixel becomes 255 when `src - mean > -ceil(offset)`, otherwise 0.
pub fn adaptive_threshold(image: &GrayImage, block_size: usize, offset: f64) -> GrayImage {
    let mean = gaussian_blur(image, block_size, 0.0, BorderMode::Replicate);
    let delta = offset.ceil() as i32;
    let mut out = GrayImage::new(image.width(), image.height());
    for ((src, m), dst) in image.iter().zip(mean.iter()).zip(out.iter_mut()) {
        *dst = if (*src as i32 - *m as i32) > -delta { 255 } else { 0 };
    }
    out
}

/// Bitwise inversion.
pub fn invert(image: &mut GrayImage) {
    for v in image.iter_mut() {
        *v = !*v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_gamma_lut_endpoints() {
        let lut = gamma_lut(1.2);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[255], 255);
        // gamma > 1 brightens midtones
        assert!(lut[128] > 128);
    }

    #[test]
    fn test_luma_weights() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        let y = luma(&img);
        assert_eq!(y.get_pixel(0, 0).0[0], 76);
        assert_eq!(y.get_pixel(1, 0).0[0], 150);
        assert_eq!(y.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_kernel_normalized_and_symmetric() {
        let k = gaussian_kernel(7, 6.0);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((k[0] - k[6]).abs() < 1e-7);
        assert!(k[3] > k[0]);
    }

    #[test]
    fn test_border_resolution() {
        assert_eq!(BorderMode::Reflect101.resolve(-1, 5), 1);
        assert_eq!(BorderMode::Reflect101.resolve(5, 5), 3);
        assert_eq!(BorderMode::Replicate.resolve(-3, 5), 0);
        assert_eq!(BorderMode::Replicate.resolve(9, 5), 4);
    }

    #[test]
    fn test_blur_preserves_constant_image() {
        let img = GrayImage::from_pixel(20, 10, Luma([137]));
        let out = gaussian_blur(&img, 7, 6.0, BorderMode::Reflect101);
        assert!(out.iter().all(|&v| v == 137));
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_spot() {
        let mut img = GrayImage::from_pixel(60, 60, Luma([200]));
        for y in 25..35 {
            for x in 25..35 {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        let out = adaptive_threshold(&img, 35, 1.0);
        assert_eq!(out.get_pixel(30, 30).0[0], 0);
        assert_eq!(out.get_pixel(5, 5).0[0], 255);
    }

    #[test]
    fn test_invert() {
        let mut img = GrayImage::from_pixel(2, 2, Luma([0]));
        invert(&mut img);
        assert!(img.iter().all(|&v| v == 255));
    }
}
