//! PNG output for captured images.

use std::path::Path;

use anyhow::{bail, Context, Result};
use capturekit::{LockOptions, PixelBuffer, PixelFormat};
use image::RgbaImage;

/// Repack strided BGRA rows into a tightly packed RGBA image.
pub fn bgra_to_rgba(data: &[u8], width: u32, height: u32, bytes_per_row: usize) -> Result<RgbaImage> {
    let row_len = width as usize * 4;
    if bytes_per_row < row_len || data.len() < bytes_per_row * height as usize {
        bail!("pixel data is smaller than a {width}x{height} BGRA image");
    }

    let mut rgba = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(bytes_per_row).take(height as usize) {
        for px in row[..row_len].chunks_exact(4) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    RgbaImage::from_raw(width, height, rgba).context("image buffer size mismatch")
}

/// Write a BGRA pixel buffer to `path`.
pub fn write_png(buffer: &PixelBuffer, path: &Path) -> Result<()> {
    if buffer.pixel_format() != Some(PixelFormat::Bgra32) {
        bail!("only BGRA frames can be written as PNG");
    }
    let guard = buffer.lock(LockOptions::READ_ONLY)?;
    let image = bgra_to_rgba(
        guard.plane_data(0)?,
        buffer.width(),
        buffer.height(),
        buffer.bytes_per_row(),
    )?;
    drop(guard);

    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swaps_channels_and_skips_padding() {
        // Two pixels per row, one padding pixel.
        let stride = 12;
        let mut data = vec![0xEE; stride * 2];
        data[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[12..20].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let image = bgra_to_rgba(&data, 2, 2, stride).unwrap();
        assert_eq!(
            image.into_raw(),
            vec![3, 2, 1, 4, 7, 6, 5, 8, 11, 10, 9, 12, 15, 14, 13, 16]
        );
    }

    #[test]
    fn test_short_data_rejected() {
        assert!(bgra_to_rgba(&[0; 16], 2, 2, 12).is_err());
        assert!(bgra_to_rgba(&[0; 64], 4, 2, 8).is_err());
    }
}
