use crate::error::{Result, TileError};
use crate::imagedata::ImageData;
use image::{GrayAlphaImage, ImageFormat, LumaA, Rgba, RgbaImage};
use std::io::Cursor;

/// Scale a value into a byte, linearly from `rescale` when given.
fn to_byte(value: f64, rescale: Option<(f64, f64)>) -> u8 {
    let scaled = match rescale {
        Some((min, max)) if max > min => (value - min) / (max - min) * 255.0,
        Some(_) => 0.0,
        None => value,
    };
    if scaled.is_nan() {
        return 0;
    }
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Encode as PNG with the mask in the alpha channel. One or two bands give a
/// grey image, three or more an RGB image from the first three bands.
pub fn to_png(image: &ImageData, rescale: Option<(f64, f64)>) -> Result<Vec<u8>> {
    let (bands, height, width) = image.data.dim();
    let (width_px, height_px) = (width as u32, height as u32);
    let alpha = |row: u32, col: u32| {
        if image.mask[[row as usize, col as usize]] {
            255
        } else {
            0
        }
    };
    let sample = |band: usize, row: u32, col: u32| {
        to_byte(image.data[[band, row as usize, col as usize]], rescale)
    };

    let mut cursor = Cursor::new(Vec::new());
    match bands {
        0 => {
            return Err(TileError::ShapeMismatch {
                expected: (1, height, width),
                found: (0, height, width),
            })
        }
        1 | 2 => {
            let png = GrayAlphaImage::from_fn(width_px, height_px, |col, row| {
                LumaA([sample(0, row, col), alpha(row, col)])
            });
            png.write_to(&mut cursor, ImageFormat::Png)?;
        }
        _ => {
            let png = RgbaImage::from_fn(width_px, height_px, |col, row| {
                Rgba([
                    sample(0, row, col),
                    sample(1, row, col),
                    sample(2, row, col),
                    alpha(row, col),
                ])
            });
            png.write_to(&mut cursor, ImageFormat::Png)?;
        }
    }
    Ok(cursor.into_inner())
}
