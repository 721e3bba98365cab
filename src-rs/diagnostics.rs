use crate::ocr::OcrRecord;
use anyhow::{Context, Result};
use chrono::Utc;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};

/// Receives intermediate images for human inspection. Implementations must
/// not influence detection results; failures to write are logged and dropped.
pub trait DiagnosticSink {
    fn processed_image(&self, stage: &str, image: &GrayImage);
    fn detection_miss(&self, stage: &str, raw: &DynamicImage, record: &OcrRecord);
}

/// Headless default.
pub struct NoDiagnostics;

impl DiagnosticSink for NoDiagnostics {
    fn processed_image(&self, _stage: &str, _image: &GrayImage) {}
    fn detection_miss(&self, _stage: &str, _raw: &DynamicImage, _record: &OcrRecord) {}
}

/// Writes every diagnostic artifact into one directory, prefixed by stage
/// and a timestamp.
pub struct DebugDir {
    root: PathBuf,
}

impl DebugDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact(&self, stage: &str, suffix: &str) -> PathBuf {
        let ts = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        self.root.join(format!("{stage}-{ts}-{suffix}"))
    }

    fn write_processed(&self, stage: &str, image: &GrayImage) -> Result<PathBuf> {
        let path = self.artifact(stage, "processed.png");
        ensure_parent_dir(&path)?;
        image
            .save(&path)
            .with_context(|| format!("failed to save processed image: {}", path.display()))?;
        Ok(path)
    }

    fn write_miss(&self, stage: &str, raw: &DynamicImage, record: &OcrRecord) -> Result<PathBuf> {
        let text_path = self.artifact(stage, "ocr.json");
        ensure_parent_dir(&text_path)?;
        let payload = serde_json::json!({
            "stage": stage,
            "raw_text": record.raw_text(),
            "tokens": record.tokens,
        });
        fs::write(&text_path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("failed to write OCR dump: {}", text_path.display()))?;

        let overlay_path = self.artifact(stage, "overlay.png");
        let overlay = token_overlay(raw, record);
        DynamicImage::ImageRgba8(overlay)
            .save(&overlay_path)
            .with_context(|| format!("failed to save overlay: {}", overlay_path.display()))?;
        Ok(overlay_path)
    }
}

impl DiagnosticSink for DebugDir {
    fn processed_image(&self, stage: &str, image: &GrayImage) {
        match self.write_processed(stage, image) {
            Ok(path) => log::info!("debug: processed {stage} image at {}", path.display()),
            Err(err) => log::warn!("debug: {err:#}"),
        }
    }

    fn detection_miss(&self, stage: &str, raw: &DynamicImage, record: &OcrRecord) {
        match self.write_miss(stage, raw, record) {
            Ok(path) => log::info!("debug: {stage} overlay at {}", path.display()),
            Err(err) => log::warn!("debug: {err:#}"),
        }
    }
}

/// Copy of `raw` with each OCR box outlined and its text printed above it.
pub fn token_overlay(raw: &DynamicImage, record: &OcrRecord) -> RgbaImage {
    let mut out = raw.to_rgba8();
    let box_color = Rgba([255, 59, 48, 255]);
    let text_color = Rgba([10, 132, 255, 255]);
    for token in &record.tokens {
        if token.text.trim().is_empty() || token.width <= 0 || token.height <= 0 {
            continue;
        }
        let (Ok(x), Ok(y)) = (u32::try_from(token.left), u32::try_from(token.top)) else {
            continue;
        };
        draw_rect_outline(&mut out, x, y, token.width as u32, token.height as u32, box_color, 1);
        draw_bitmap_text(
            &mut out,
            token.left as i32,
            token.top as i32 - 9,
            token.text.trim(),
            text_color,
        );
    }
    out
}

fn draw_rect_outline(
    img: &mut RgbaImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    color: Rgba<u8>,
    thickness: u32,
) {
    if w == 0 || h == 0 || img.width() == 0 || img.height() == 0 {
        return;
    }
    let max_x = img.width() - 1;
    let max_y = img.height() - 1;
    if x > max_x || y > max_y {
        return;
    }
    let x1 = (x + w - 1).min(max_x);
    let y1 = (y + h - 1).min(max_y);

    for t in 0..thickness.max(1) {
        let tx0 = x.saturating_sub(t);
        let ty0 = y.saturating_sub(t);
        let tx1 = (x1 + t).min(max_x);
        let ty1 = (y1 + t).min(max_y);
        for xx in tx0..=tx1 {
            img.put_pixel(xx, ty0, color);
            img.put_pixel(xx, ty1, color);
        }
        for yy in ty0..=ty1 {
            img.put_pixel(tx0, yy, color);
            img.put_pixel(tx1, yy, color);
        }
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>) {
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (row >> col_idx) & 1 == 0 {
                    continue;
                }
                let tx = cursor_x + col_idx;
                let ty = y + row_idx as i32;
                if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32 {
                    img.put_pixel(tx as u32, ty as u32, color);
                }
            }
        }
        cursor_x += 8;
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}
