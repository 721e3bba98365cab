use crate::config::RegionOfInterest;
use crate::diagnostics::DiagnosticSink;
use image::{DynamicImage, GrayImage, Luma};

/// 3x3 sharpen kernel, normalised by its sum (16).
const SHARPEN_KERNEL: [i32; 9] = [-2, -2, -2, -2, 32, -2, -2, -2, -2];
const SHARPEN_SCALE: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessParams {
    pub region: RegionOfInterest,
    pub contrast_factor: f32,
    pub threshold: u8,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            region: RegionOfInterest::default(),
            contrast_factor: 2.5,
            threshold: 128,
        }
    }
}

/// Binarized crop plus where it sat in the source screenshot.
#[derive(Debug, Clone)]
pub struct ProcessedCrop {
    pub image: GrayImage,
    pub origin: (u32, u32),
}

/// crop -> grayscale -> contrast -> sharpen -> binarize.
pub fn preprocess(
    image: &DynamicImage,
    params: &PreprocessParams,
    sink: &dyn DiagnosticSink,
) -> ProcessedCrop {
    let (x, y, w, h) = params.region.pixel_box(image.width(), image.height());
    let cropped = image.crop_imm(x, y, w, h);
    let gray = cropped.to_luma8();
    let contrasted = enhance_contrast(&gray, params.contrast_factor);
    let sharpened = sharpen(&contrasted);
    let binary = binarize(&sharpened, params.threshold);
    sink.processed_image("controls", &binary);
    ProcessedCrop {
        image: binary,
        origin: (x, y),
    }
}

/// Blends each pixel away from the image's mean luminance by `factor`.
pub fn enhance_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return image.clone();
    }
    let sum: u64 = image.pixels().map(|p| u64::from(p.0[0])).sum();
    let mean = (sum as f32 / count as f32 + 0.5).floor();
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let v = mean + factor * (f32::from(pixel.0[0]) - mean);
        pixel.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// PIL's SHARPEN kernel. Border pixels are copied through unchanged, which
/// `imageops::filter3x3` does not do.
pub fn sharpen(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = 0i32;
            for (k, weight) in SHARPEN_KERNEL.iter().enumerate() {
                let kx = x + k as u32 % 3 - 1;
                let ky = y + k as u32 / 3 - 1;
                acc += weight * i32::from(image.get_pixel(kx, ky).0[0]);
            }
            let v = (acc + SHARPEN_SCALE / 2).div_euclid(SHARPEN_SCALE);
            out.put_pixel(x, y, Luma([v.clamp(0, 255) as u8]));
        }
    }
    out
}

/// Strictly above `threshold` becomes white, everything else black.
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > threshold { 255 } else { 0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NoDiagnostics;
    use crate::ocr::OcrRecord;
    use image::{ImageBuffer, Rgba};
    use std::cell::Cell;

    struct CountingSink {
        calls: Cell<u32>,
    }

    impl DiagnosticSink for CountingSink {
        fn processed_image(&self, _stage: &str, _image: &GrayImage) {
            self.calls.set(self.calls.get() + 1);
        }
        fn detection_miss(&self, _stage: &str, _raw: &DynamicImage, _record: &OcrRecord) {}
    }

    #[test]
    fn crops_default_region() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(200, 120, Rgba([255, 255, 255, 255])));
        let out = preprocess(&img, &PreprocessParams::default(), &NoDiagnostics);
        assert_eq!(out.image.dimensions(), (100, 30));
        assert_eq!(out.origin, (0, 0));
    }

    #[test]
    fn output_is_strictly_binary() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_fn(64, 64, |x, y| {
            let v = ((x * 4 + y) % 256) as u8;
            Rgba([v, v / 2, 255 - v, 255])
        }));
        let out = preprocess(&img, &PreprocessParams::default(), &NoDiagnostics);
        assert!(out.image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn threshold_is_exclusive() {
        let img: GrayImage = ImageBuffer::from_fn(3, 1, |x, _| Luma([127 + x as u8]));
        let out = binarize(&img, 128);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 0);
        assert_eq!(out.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn contrast_spreads_around_mean() {
        let img: GrayImage = ImageBuffer::from_fn(2, 1, |x, _| Luma([if x == 0 { 100 } else { 140 }]));
        let out = enhance_contrast(&img, 2.5);
        assert_eq!(out.get_pixel(0, 0).0[0], 70);
        assert_eq!(out.get_pixel(1, 0).0[0], 170);
    }

    #[test]
    fn sharpen_keeps_flat_regions() {
        let img: GrayImage = ImageBuffer::from_pixel(5, 5, Luma([90]));
        assert_eq!(sharpen(&img), img);
    }

    #[test]
    fn sharpen_amplifies_a_bright_dot() {
        let mut img: GrayImage = ImageBuffer::from_pixel(3, 3, Luma([50]));
        img.put_pixel(1, 1, Luma([100]));
        assert_eq!(sharpen(&img).get_pixel(1, 1).0[0], 150);
    }

    #[test]
    fn sharpen_copies_border_pixels() {
        let img: GrayImage =
            ImageBuffer::from_fn(4, 4, |x, y| Luma([if (x, y) == (1, 1) { 200 } else { 100 }]));
        let out = sharpen(&img);
        assert_eq!(out.get_pixel(0, 1).0[0], 100);
        assert_eq!(out.get_pixel(1, 0).0[0], 100);
        assert_eq!(out.get_pixel(3, 3).0[0], 100);
        assert_eq!(out.get_pixel(2, 2).0[0], 88);
    }

    #[test]
    fn debug_hook_does_not_change_output() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(40, 40, Rgba([30, 200, 90, 255])));
        let sink = CountingSink { calls: Cell::new(0) };
        let with_hook = preprocess(&img, &PreprocessParams::default(), &sink);
        let without = preprocess(&img, &PreprocessParams::default(), &NoDiagnostics);
        assert_eq!(sink.calls.get(), 1);
        assert_eq!(with_hook.image, without.image);
    }
}
