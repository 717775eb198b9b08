//! Perceptual dedup hashing (spec §4.5 step 1-2): a 64-bit difference
//! hash over a 9x8 grayscale thumbnail, plus Hamming distance so the
//! pipeline can skip re-analyzing a frame that looks like the last one.

use ocn_domain::{Error, Result};

const HASH_W: u32 = 9;
const HASH_H: u32 = 8;

pub fn compute_dhash(image_bytes: &[u8]) -> Result<u64> {
    let img = image::load_from_memory(image_bytes).map_err(|e| Error::BadRequest(format!("invalid image: {e}")))?;
    let small = img.resize_exact(HASH_W, HASH_H, image::imageops::FilterType::Triangle).to_luma8();

    let mut hash: u64 = 0;
    let mut bit = 0u32;
    for y in 0..HASH_H {
        for x in 0..HASH_W - 1 {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            if left > right {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }
    Ok(hash)
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(pixels: &[u8], w: u32, h: u32) -> Vec<u8> {
        let img = image::GrayImage::from_raw(w, h, pixels.to_vec()).unwrap();
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img).write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn identical_images_hash_to_zero_distance() {
        let pixels = vec![128u8; 32 * 32];
        let png = encode_png(&pixels, 32, 32);
        let h1 = compute_dhash(&png).unwrap();
        let h2 = compute_dhash(&png).unwrap();
        assert_eq!(hamming_distance(h1, h2), 0);
    }

    #[test]
    fn a_very_different_image_has_a_large_distance() {
        let flat = encode_png(&vec![20u8; 32 * 32], 32, 32);
        let mut gradient = vec![0u8; 32 * 32];
        for (i, p) in gradient.iter_mut().enumerate() {
            *p = ((i % 32) * 8) as u8;
        }
        let gradient_png = encode_png(&gradient, 32, 32);
        let h1 = compute_dhash(&flat).unwrap();
        let h2 = compute_dhash(&gradient_png).unwrap();
        assert!(hamming_distance(h1, h2) > 10);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = compute_dhash(b"not an image").unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }
}
