use crate::geometry::ScreenshotPoint;
use anyhow::{bail, Context, Result};
use image::DynamicImage;
use rand::Rng;
use serde::Serialize;
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// One word/glyph box reported by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrToken {
    pub text: String,
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
    pub conf: f32,
}

impl OcrToken {
    pub fn new(text: &str, left: i64, top: i64, width: i64, height: i64) -> Self {
        Self {
            text: text.to_string(),
            left,
            top,
            width,
            height,
            conf: -1.0,
        }
    }

    pub fn position(&self) -> ScreenshotPoint {
        ScreenshotPoint::new(self.left as f64, self.top as f64)
    }
}

/// Tokens in engine scan order. The order carries no meaning beyond
/// deciding which of several equal candidates is "first".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrRecord {
    pub tokens: Vec<OcrToken>,
}

impl OcrRecord {
    pub fn new(tokens: Vec<OcrToken>) -> Self {
        Self { tokens }
    }

    /// Shifts every box, used to lift crop-relative boxes back into full
    /// screenshot space.
    pub fn translated(mut self, dx: i64, dy: i64) -> Self {
        for token in &mut self.tokens {
            token.left += dx;
            token.top += dy;
        }
        self
    }

    pub fn raw_text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arrow {
    Previous,
    Next,
}

impl Arrow {
    pub const ALL: [Arrow; 2] = [Arrow::Previous, Arrow::Next];

    pub fn glyph(self) -> &'static str {
        match self {
            Arrow::Previous => "<",
            Arrow::Next => ">",
        }
    }

    fn from_token(text: &str) -> Option<Self> {
        Arrow::ALL.into_iter().find(|arrow| arrow.glyph() == text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolHits {
    pub previous: Vec<ScreenshotPoint>,
    pub next: Vec<ScreenshotPoint>,
}

impl SymbolHits {
    pub fn get(&self, arrow: Arrow) -> &[ScreenshotPoint] {
        match arrow {
            Arrow::Previous => &self.previous,
            Arrow::Next => &self.next,
        }
    }

    fn push(&mut self, arrow: Arrow, point: ScreenshotPoint) {
        match arrow {
            Arrow::Previous => self.previous.push(point),
            Arrow::Next => self.next.push(point),
        }
    }
}

/// Case-sensitive substring search over token texts.
pub fn find_text(record: &OcrRecord, needle: &str) -> Vec<ScreenshotPoint> {
    record
        .tokens
        .iter()
        .filter(|token| token.text.contains(needle))
        .map(OcrToken::position)
        .collect()
}

/// Exact-match search for the two arrow glyphs.
pub fn find_symbols(record: &OcrRecord) -> SymbolHits {
    let mut hits = SymbolHits::default();
    for token in &record.tokens {
        if let Some(arrow) = Arrow::from_token(&token.text) {
            hits.push(arrow, token.position());
        }
    }
    hits
}

pub trait OcrEngine {
    fn text(&self, image: &DynamicImage) -> Result<String>;
    fn data(&self, image: &DynamicImage) -> Result<OcrRecord>;
}

/// Runs the `tesseract` executable on a temporary PNG.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    pub binary: PathBuf,
    pub language: Option<String>,
    pub psm: Option<u32>,
    pub timeout: Duration,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: None,
            psm: None,
            timeout: Duration::from_secs(60),
        }
    }

    fn run(&self, image: &DynamicImage, tsv: bool) -> Result<String> {
        let rand = rand::thread_rng().gen_range(1000..9999);
        let base = env::temp_dir().join(format!(
            "imagery-history-ocr-{}-{rand}",
            std::process::id()
        ));
        let input = base.with_extension("png");
        let output = base.with_extension(if tsv { "tsv" } else { "txt" });

        let result = image
            .save(&input)
            .with_context(|| format!("failed to write OCR input: {}", input.display()))
            .and_then(|_| self.invoke(&input, &base, tsv))
            .and_then(|_| {
                fs::read_to_string(&output)
                    .with_context(|| format!("OCR output missing: {}", output.display()))
            });

        let _ = fs::remove_file(&input);
        let _ = fs::remove_file(&output);
        result
    }

    fn invoke(&self, input: &Path, base: &Path, tsv: bool) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(input).arg(base);
        if let Some(lang) = self.language.as_deref() {
            cmd.arg("-l").arg(lang);
        }
        if let Some(psm) = self.psm {
            cmd.arg("--psm").arg(psm.to_string());
        }
        if tsv {
            cmd.arg("tsv");
        }
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;
        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("tesseract timed out after {}s", self.timeout.as_secs());
            }
        };
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            bail!(
                "tesseract failed with status {}: {}",
                status.code().unwrap_or(1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl OcrEngine for TesseractCli {
    fn text(&self, image: &DynamicImage) -> Result<String> {
        self.run(image, false)
    }

    fn data(&self, image: &DynamicImage) -> Result<OcrRecord> {
        Ok(parse_tsv(&self.run(image, true)?))
    }
}

/// Parses tesseract's TSV output; the header and malformed rows are skipped.
pub fn parse_tsv(raw: &str) -> OcrRecord {
    let mut tokens = Vec::new();
    for line in raw.lines() {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 11 {
            continue;
        }
        let num = |idx: usize| cols[idx].trim().parse::<i64>().ok();
        let (Some(left), Some(top), Some(width), Some(height)) = (num(6), num(7), num(8), num(9))
        else {
            continue;
        };
        let conf = cols[10].trim().parse::<f32>().unwrap_or(-1.0);
        let text = cols.get(11).map(|t| t.trim_end_matches('\r')).unwrap_or("");
        tokens.push(OcrToken {
            text: text.to_string(),
            left,
            top,
            width,
            height,
            conf,
        });
    }
    OcrRecord { tokens }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> OcrRecord {
        OcrRecord::new(vec![
            OcrToken::new("Imagery", 10, 5, 40, 12),
            OcrToken::new("2020", 50, 5, 30, 12),
            OcrToken::new("<", 5, 5, 6, 12),
            OcrToken::new(">", 60, 5, 6, 12),
        ])
    }

    #[test]
    fn finds_text_positions() {
        let hits = find_text(&sample_record(), "Imagery");
        assert_eq!(hits, vec![ScreenshotPoint::new(10.0, 5.0)]);
    }

    #[test]
    fn text_search_is_substring_and_case_sensitive() {
        let record = OcrRecord::new(vec![
            OcrToken::new("Imagery:", 1, 2, 3, 4),
            OcrToken::new("imagery", 5, 6, 7, 8),
        ]);
        assert_eq!(find_text(&record, "Imagery"), vec![ScreenshotPoint::new(1.0, 2.0)]);
    }

    #[test]
    fn finds_symbol_positions() {
        let hits = find_symbols(&sample_record());
        assert_eq!(hits.get(Arrow::Previous), &[ScreenshotPoint::new(5.0, 5.0)]);
        assert_eq!(hits.get(Arrow::Next), &[ScreenshotPoint::new(60.0, 5.0)]);
    }

    #[test]
    fn symbols_require_exact_token() {
        let record = OcrRecord::new(vec![OcrToken::new("<<", 0, 0, 1, 1), OcrToken::new("a>", 0, 0, 1, 1)]);
        assert_eq!(find_symbols(&record), SymbolHits::default());
    }

    #[test]
    fn no_match_is_empty_not_error() {
        assert!(find_text(&OcrRecord::default(), "Dismiss").is_empty());
    }

    #[test]
    fn parses_tesseract_tsv() {
        let raw = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t640\t160\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t12\t7\t52\t11\t91.5\tImagery\n\
                   5\t1\t1\t1\t1\t2\t70\t7\t6\t11\t60\t<\n\
                   garbage row\n";
        let record = parse_tsv(raw);
        assert_eq!(record.tokens.len(), 3);
        assert_eq!(record.tokens[1].text, "Imagery");
        assert_eq!(record.tokens[1].left, 12);
        assert_eq!(record.tokens[1].conf, 91.5);
        assert_eq!(record.tokens[2].text, "<");
        assert_eq!(record.raw_text(), "Imagery <");
    }

    #[cfg(unix)]
    fn fake_tesseract(dir: &Path, body: &str) -> TesseractCli {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("tesseract");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        TesseractCli::new(script)
    }

    fn blank_image() -> DynamicImage {
        DynamicImage::ImageLuma8(image::GrayImage::from_pixel(4, 4, image::Luma([255])))
    }

    #[cfg(unix)]
    #[test]
    fn reads_text_written_by_tesseract() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = fake_tesseract(dir.path(), r#"printf 'Data attribution 1/2/2003' > "$2.txt""#);
        assert_eq!(ocr.text(&blank_image()).unwrap(), "Data attribution 1/2/2003");
    }

    #[cfg(unix)]
    #[test]
    fn missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = fake_tesseract(dir.path(), "exit 0");
        let err = ocr.data(&blank_image()).unwrap_err();
        assert!(format!("{err:#}").contains("OCR output missing"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tesseract_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = fake_tesseract(dir.path(), "echo 'no language data' >&2; exit 3");
        let err = ocr.text(&blank_image()).unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("status 3"));
        assert!(text.contains("no language data"));
    }

    #[cfg(unix)]
    #[test]
    fn slow_tesseract_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = TesseractCli {
            timeout: Duration::from_secs(1),
            ..fake_tesseract(dir.path(), "sleep 5")
        };
        let err = ocr.text(&blank_image()).unwrap_err();
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[test]
    fn translation_lifts_crop_coordinates() {
        let record = sample_record().translated(100, 20);
        assert_eq!(find_text(&record, "2020"), vec![ScreenshotPoint::new(150.0, 25.0)]);
    }
}
