//! Preprocessed variants of a page image.
//!
//! OCR engines react to contrast and noise in ways that depend on the input,
//! so instead of tuning preprocessing per page we derive a small fixed set of
//! standard perturbations and let the pass scheduler rotate through them.
//!
//! Every variant is derived from the source image directly, never from another
//! variant. The enhancement operators follow the usual "blend with a degenerate
//! image" definition: a factor of 1.0 returns the input, larger factors
//! exaggerate the difference from the degenerate image.

use image::{ColorType, DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, RgbImage};
use imageproc::{
    filter::{filter3x3, median_filter},
    map::WithChannel,
};

use crate::prelude::*;

/// Contrast factor for the color (or gray) contrast variant.
pub const CONTRAST_FACTOR: f32 = 1.5;

/// Sharpness factor for the sharpened variant.
pub const SHARPNESS_FACTOR: f32 = 2.0;

/// Radius of the median filter window. A radius of 1 is a 3x3 window.
pub const MEDIAN_RADIUS: u32 = 1;

/// Contrast factor applied after converting a color page to grayscale.
pub const GRAYSCALE_CONTRAST_FACTOR: f32 = 2.0;

/// The smoothing kernel the sharpened variant is blended against: center
/// weight 5, all other weights 1.
#[rustfmt::skip]
const SMOOTH_KERNEL: [f32; 9] = [
    1.0 / 13.0, 1.0 / 13.0, 1.0 / 13.0,
    1.0 / 13.0, 5.0 / 13.0, 1.0 / 13.0,
    1.0 / 13.0, 1.0 / 13.0, 1.0 / 13.0,
];

/// A single derivation. Returns `Ok(None)` if it does not apply to the image.
type Derivation = fn(&DynamicImage) -> Result<Option<DynamicImage>>;

/// The derivations applied after the identity copy, in order.
const DERIVATIONS: &[(&str, Derivation)] = &[
    ("contrast", contrast_variant),
    ("sharpness", sharpness_variant),
    ("median", median_variant),
    ("grayscale_contrast", grayscale_contrast_variant),
];

/// Generate the ordered variants of `image`.
///
/// The first variant is always an unmodified copy of `image`. The others are,
/// in order: contrast 1.5x, sharpness 2.0x, a 3x3 median filter, and (for
/// images that aren't already single-channel) grayscale with contrast 2.0x.
/// A derivation that fails is logged and skipped, so this never returns an
/// empty list.
pub fn generate_variants(image: &DynamicImage) -> Vec<DynamicImage> {
    let mut variants = Vec::with_capacity(1 + DERIVATIONS.len());
    variants.push(image.clone());
    for (name, derive) in DERIVATIONS {
        match derive(image) {
            Ok(Some(variant)) => variants.push(variant),
            Ok(None) => trace!(variant = *name, "variant does not apply"),
            Err(err) => warn!(variant = *name, "skipping image variant: {:#}", err),
        }
    }
    variants
}

/// Is this image already single-channel grayscale?
fn is_single_channel(image: &DynamicImage) -> bool {
    matches!(image.color(), ColorType::L8 | ColorType::L16)
}

/// The 8-bit buffer we actually do image processing on.
enum WorkingImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl WorkingImage {
    /// Convert `image` to an 8-bit working copy, keeping it single-channel if
    /// it was single-channel to begin with.
    fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            bail!("image has zero dimensions");
        }
        if is_single_channel(image) {
            Ok(Self::Gray(image.to_luma8()))
        } else {
            Ok(Self::Rgb(image.to_rgb8()))
        }
    }

    /// The rounded mean luminance of the image.
    fn mean_luma(&self) -> f32 {
        match self {
            Self::Gray(gray) => mean_sample(gray),
            Self::Rgb(rgb) => mean_sample(&luma_from_rgb(rgb)),
        }
    }
}

fn contrast_variant(image: &DynamicImage) -> Result<Option<DynamicImage>> {
    let working = WorkingImage::from_dynamic(image)?;
    let mean = working.mean_luma();
    Ok(Some(match working {
        WorkingImage::Gray(gray) => {
            DynamicImage::ImageLuma8(blend_with_constant(&gray, mean, CONTRAST_FACTOR))
        }
        WorkingImage::Rgb(rgb) => {
            DynamicImage::ImageRgb8(blend_with_constant(&rgb, mean, CONTRAST_FACTOR))
        }
    }))
}

fn sharpness_variant(image: &DynamicImage) -> Result<Option<DynamicImage>> {
    Ok(Some(match WorkingImage::from_dynamic(image)? {
        WorkingImage::Gray(gray) => {
            DynamicImage::ImageLuma8(enhance_sharpness(&gray, SHARPNESS_FACTOR))
        }
        WorkingImage::Rgb(rgb) => {
            DynamicImage::ImageRgb8(enhance_sharpness(&rgb, SHARPNESS_FACTOR))
        }
    }))
}

fn median_variant(image: &DynamicImage) -> Result<Option<DynamicImage>> {
    Ok(Some(match WorkingImage::from_dynamic(image)? {
        WorkingImage::Gray(gray) => DynamicImage::ImageLuma8(median_filter(
            &gray,
            MEDIAN_RADIUS,
            MEDIAN_RADIUS,
        )),
        WorkingImage::Rgb(rgb) => {
            DynamicImage::ImageRgb8(median_filter(&rgb, MEDIAN_RADIUS, MEDIAN_RADIUS))
        }
    }))
}

fn grayscale_contrast_variant(image: &DynamicImage) -> Result<Option<DynamicImage>> {
    match WorkingImage::from_dynamic(image)? {
        WorkingImage::Gray(_) => Ok(None),
        WorkingImage::Rgb(rgb) => {
            let gray = luma_from_rgb(&rgb);
            let mean = mean_sample(&gray);
            Ok(Some(DynamicImage::ImageLuma8(blend_with_constant(
                &gray,
                mean,
                GRAYSCALE_CONTRAST_FACTOR,
            ))))
        }
    }
}

/// Convert RGB to luminance with ITU-R 601-2 weights, in fixed point.
fn luma_from_rgb(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471
            + 0x8000)
            >> 16;
        Luma([l.min(255) as u8])
    })
}

/// The mean sample value, rounded to the nearest integer.
fn mean_sample(gray: &GrayImage) -> f32 {
    let samples = gray.as_raw();
    if samples.is_empty() {
        return 0.0;
    }
    let sum = samples.iter().map(|&s| u64::from(s)).sum::<u64>();
    (sum as f64 / samples.len() as f64).round() as f32
}

/// Blend a degenerate sample value `from` towards `to` by `factor`.
fn blend(from: f32, to: f32, factor: f32) -> u8 {
    (from + factor * (to - from)).round().clamp(0.0, 255.0) as u8
}

/// Blend every sample against a solid degenerate image of value `constant`.
fn blend_with_constant<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    constant: f32,
    factor: f32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = image.clone();
    let samples: &mut [u8] = &mut out;
    for sample in samples.iter_mut() {
        *sample = blend(constant, f32::from(*sample), factor);
    }
    out
}

/// Blend every sample against a smoothed copy of the image.
///
/// Edge pixels are not smoothed, so they pass through unchanged.
fn enhance_sharpness<P>(image: &ImageBuffer<P, Vec<u8>>, factor: f32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + WithChannel<u8, Pixel = P>,
{
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    if width < 3 || height < 3 {
        return out;
    }

    let smoothed = filter3x3::<P, f32, u8>(image, &SMOOTH_KERNEL);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            continue;
        }
        let smooth = smoothed.get_pixel(x, y).channels();
        for (sample, &degenerate) in pixel.channels_mut().iter_mut().zip(smooth) {
            *sample = blend(f32::from(degenerate), f32::from(*sample), factor);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn color_page() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(8, 6, |x, y| {
            Rgb([(x * 30) as u8, (y * 40) as u8, 128])
        }))
    }

    #[test]
    fn color_images_get_five_variants_starting_with_the_original() {
        let image = color_page();
        let variants = generate_variants(&image);
        assert_eq!(variants.len(), 5);
        assert_eq!(variants[0], image);
        assert_eq!(variants[4].color(), ColorType::L8);
        for variant in &variants {
            assert_eq!(variant.width(), 8);
            assert_eq!(variant.height(), 6);
        }
    }

    #[test]
    fn grayscale_images_get_four_variants() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(5, 5, |x, _| {
            Luma([(x * 50) as u8])
        }));
        let variants = generate_variants(&image);
        assert_eq!(variants.len(), 4);
        assert_eq!(variants[0], image);
        assert!(variants.iter().all(|v| v.color() == ColorType::L8));
    }

    #[test]
    fn variants_are_deterministic() {
        let image = color_page();
        assert_eq!(generate_variants(&image), generate_variants(&image));
    }

    #[test]
    fn empty_images_only_get_the_identity_copy() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let variants = generate_variants(&image);
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0], image);
    }

    #[test]
    fn contrast_stretches_away_from_the_mean() {
        let gray = GrayImage::from_raw(2, 1, vec![100, 200]).unwrap();
        let variant = contrast_variant(&DynamicImage::ImageLuma8(gray))
            .unwrap()
            .unwrap();
        // Mean is 150, so 100 -> 150 - 1.5 * 50 and 200 -> 150 + 1.5 * 50.
        assert_eq!(variant.as_bytes(), &[75, 225]);
    }

    #[test]
    fn sharpness_leaves_flat_images_and_edges_alone() {
        let flat = RgbImage::from_pixel(4, 4, Rgb([90, 90, 90]));
        assert_eq!(enhance_sharpness(&flat, SHARPNESS_FACTOR), flat);

        let mut spot = GrayImage::from_pixel(3, 3, Luma([0]));
        spot.put_pixel(1, 1, Luma([130]));
        let sharpened = enhance_sharpness(&spot, SHARPNESS_FACTOR);
        // Smoothed center is 130 * 5 / 13 = 50, so 50 + 2 * (130 - 50) = 210.
        assert_eq!(sharpened.get_pixel(1, 1).0, [210]);
        assert_eq!(sharpened.get_pixel(0, 0).0, [0]);
    }

    #[test]
    fn sharpness_only_changes_interior_pixels() {
        let image = RgbImage::from_fn(6, 5, |x, y| Rgb([(x * 40) as u8, (y * 50) as u8, 7]));
        let sharpened = enhance_sharpness(&image, SHARPNESS_FACTOR);
        for (x, y, pixel) in sharpened.enumerate_pixels() {
            if x == 0 || y == 0 || x == 5 || y == 4 {
                assert_eq!(pixel, image.get_pixel(x, y), "border pixel ({x}, {y})");
            }
        }
        // A bright isolated dot on a dark background gets brighter.
        let mut dot = GrayImage::from_pixel(5, 5, Luma([20]));
        dot.put_pixel(2, 2, Luma([100]));
        let sharpened = enhance_sharpness(&dot, SHARPNESS_FACTOR);
        assert!(sharpened.get_pixel(2, 2).0[0] > 100);
        assert!(sharpened.get_pixel(1, 1).0[0] < 20);
    }

    #[test]
    fn median_removes_isolated_specks() {
        let mut speckled = GrayImage::from_pixel(5, 5, Luma([0]));
        speckled.put_pixel(2, 2, Luma([255]));
        let variant = median_variant(&DynamicImage::ImageLuma8(speckled))
            .unwrap()
            .unwrap();
        assert!(variant.as_bytes().iter().all(|&s| s == 0));
    }

    #[test]
    fn grayscale_uses_601_luma_weights() {
        let rgb = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(luma_from_rgb(&rgb).get_pixel(0, 0).0, [76]);
    }
}
