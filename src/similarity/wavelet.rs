//! Haar wavelet perceptual hash.
//!
//! The image is reduced to grayscale at the largest power-of-two square that
//! fits it (never below the hash grid), the max-level LL band is removed (equivalent to subtracting the
//! mean), and the remaining signal is Haar-decomposed until the LL band is
//! `HASH_SIZE` square. Each LL coefficient above the band median sets a bit.

use image::imageops::FilterType;
use image::DynamicImage;

use super::hash::{HashError, ImageHash, HASH_SIZE};

/// Decode `bytes` and hash the image.
pub fn hash_bytes(bytes: &[u8]) -> Result<(ImageHash, u32, u32), HashError> {
    let image = image::load_from_memory(bytes)?;
    let hash = wavelet_hash(&image)?;
    Ok((hash, image.width(), image.height()))
}

pub fn wavelet_hash(image: &DynamicImage) -> Result<ImageHash, HashError> {
    let (width, height) = (image.width(), image.height());
    let min_side = width.min(height);
    if min_side == 0 {
        return Err(HashError::ImageTooSmall { width, height });
    }

    // Thin images are upscaled to the hash grid.
    let scale = (1u32 << min_side.ilog2()).max(HASH_SIZE);
    let levels = scale.ilog2() - HASH_SIZE.ilog2();

    let gray = image::imageops::resize(&image.to_luma8(), scale, scale, FilterType::Lanczos3);
    let mut pixels: Vec<f64> = gray.pixels().map(|p| f64::from(p.0[0]) / 255.0).collect();

    let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
    pixels.iter_mut().for_each(|p| *p -= mean);

    let mut size = scale as usize;
    for _ in 0..levels {
        pixels = haar_ll(&pixels, size);
        size /= 2;
    }

    let median = median(&pixels);
    let bits: Vec<bool> = pixels.iter().map(|&c| c > median).collect();
    Ok(ImageHash::from_bits(&bits))
}

/// One level of the orthonormal 2D Haar transform, keeping only the LL band.
fn haar_ll(pixels: &[f64], size: usize) -> Vec<f64> {
    let half = size / 2;
    let mut out = Vec::with_capacity(half * half);
    for y in 0..half {
        for x in 0..half {
            let top = 2 * y * size + 2 * x;
            let bottom = top + size;
            let sum = pixels[top] + pixels[top + 1] + pixels[bottom] + pixels[bottom + 1];
            out.push(sum / 2.0);
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
