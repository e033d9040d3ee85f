//! Binary alpha compositing from a segmentation mask.
//!
//! Foreground pixels keep their color and become fully opaque. Background
//! pixels are zeroed in every channel, so no stale color survives if the
//! alpha is later discarded or reinterpreted.

use image::{GrayImage, Luma, RgbImage, RgbaImage};

use crate::error::{Error, Result};
use crate::label::{Label, LabelMask};

/// Alpha value for foreground pixels.
pub const OPAQUE: u8 = 255;

/// Alpha value for background pixels.
pub const TRANSPARENT: u8 = 0;

/// Single-channel opacity mask: [`OPAQUE`] for foreground labels,
/// [`TRANSPARENT`] otherwise.
#[must_use]
pub fn opacity_mask(mask: &LabelMask) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([alpha_for(mask.get(x, y))])
    })
}

/// Merge `image` with the opacity derived from `mask` into an RGBA buffer.
///
/// Pure and per-pixel; rows are processed in parallel when the `parallel`
/// feature is enabled.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the image and mask dimensions differ.
pub fn composite(image: &RgbImage, mask: &LabelMask) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(Error::InvalidInput(format!(
            "image {}x{} does not match mask {}x{}",
            image.width(),
            image.height(),
            mask.width(),
            mask.height()
        )));
    }

    let (width, height) = image.dimensions();
    let mut output = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return Ok(output);
    }

    let w = width as usize;
    let src = image.as_raw();
    let labels = mask.as_slice();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        output
            .par_chunks_mut(w * 4)
            .enumerate()
            .for_each(|(y, row)| {
                composite_row(
                    &src[y * w * 3..(y + 1) * w * 3],
                    &labels[y * w..(y + 1) * w],
                    row,
                );
            });
    }

    #[cfg(not(feature = "parallel"))]
    {
        output.chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
            composite_row(
                &src[y * w * 3..(y + 1) * w * 3],
                &labels[y * w..(y + 1) * w],
                row,
            );
        });
    }

    Ok(output)
}

fn composite_row(src: &[u8], labels: &[Label], out: &mut [u8]) {
    for ((px, &label), dst) in src
        .chunks_exact(3)
        .zip(labels)
        .zip(out.chunks_exact_mut(4))
    {
        if label.is_foreground() {
            dst[..3].copy_from_slice(px);
            dst[3] = OPAQUE;
        } else {
            dst.fill(TRANSPARENT);
        }
    }
}

const fn alpha_for(label: Label) -> u8 {
    if label.is_foreground() {
        OPAQUE
    } else {
        TRANSPARENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                u8::try_from(x * 20 % 256).unwrap(),
                u8::try_from(y * 30 % 256).unwrap(),
                200,
            ])
        })
    }

    fn checkerboard(width: u32, height: u32) -> LabelMask {
        let mut mask = LabelMask::filled(width, height, Label::ProbableBackground);
        for y in 0..height {
            for x in 0..width {
                let label = match (x + y) % 4 {
                    0 => Label::ProbableForeground,
                    1 => Label::DefiniteBackground,
                    2 => Label::DefiniteForeground,
                    _ => Label::ProbableBackground,
                };
                mask.set(x, y, label);
            }
        }
        mask
    }

    #[test]
    fn checkerboard_alpha_is_reproduced() {
        let img = gradient(7, 5);
        let mask = checkerboard(7, 5);
        let out = composite(&img, &mask).unwrap();

        for y in 0..5 {
            for x in 0..7 {
                let px = out.get_pixel(x, y);
                if mask.get(x, y).is_foreground() {
                    let src = img.get_pixel(x, y);
                    assert_eq!(*px, Rgba([src[0], src[1], src[2], 255]));
                } else {
                    assert_eq!(*px, Rgba([0, 0, 0, 0]));
                }
            }
        }
    }

    #[test]
    fn opacity_mask_matches_labels() {
        let mask = checkerboard(6, 6);
        let alpha = opacity_mask(&mask);
        for (x, y, Luma([a])) in alpha.enumerate_pixels() {
            let expected = if mask.get(x, y).is_foreground() { 255 } else { 0 };
            assert_eq!(*a, expected);
        }
    }

    #[test]
    fn composite_is_idempotent() {
        let img = gradient(9, 4);
        let mask = checkerboard(9, 4);
        let a = composite(&img, &mask).unwrap();
        let b = composite(&img, &mask).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn dimension_mismatch_is_invalid_input() {
        let img = gradient(4, 4);
        let mask = LabelMask::filled(4, 3, Label::ProbableForeground);
        assert!(matches!(
            composite(&img, &mask),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_image_composites_to_empty_buffer() {
        let img = RgbImage::new(0, 0);
        let mask = LabelMask::filled(0, 0, Label::ProbableForeground);
        let out = composite(&img, &mask).unwrap();
        assert_eq!(out.dimensions(), (0, 0));
    }
}
