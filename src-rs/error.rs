use crate::geometry::ScreenshotPoint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(
        "could not align the previous/next controls with the '{anchor_label}' label.\n\
         anchors found: {anchors}\n\
         '<' found: {previous}\n\
         '>' found: {next}\n\
         OCR text: {ocr_text:?}\n\
         Tune the region of interest, contrast factor or threshold (try --debug-dir to inspect the processed crop)."
    )]
    ControlsNotFound {
        anchor_label: String,
        anchors: PointList,
        previous: PointList,
        next: PointList,
        ocr_text: String,
    },
    #[error("date must be in the format 'YYYY-MM-DD' (got {0:?})")]
    InvalidCaptureDate(String),
}

/// Display helper so the error message carries the raw detected positions.
#[derive(Debug, Clone, Default)]
pub struct PointList(pub Vec<ScreenshotPoint>);

impl std::fmt::Display for PointList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (idx, point) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{point}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controls_not_found_lists_raw_positions() {
        let err = ScrapeError::ControlsNotFound {
            anchor_label: "Imagery".to_string(),
            anchors: PointList(vec![ScreenshotPoint::new(10.0, 5.0)]),
            previous: PointList(vec![ScreenshotPoint::new(5.0, 50.0)]),
            next: PointList(Vec::new()),
            ocr_text: "Imagery 2020 <".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("anchors found: [(10, 5)]"));
        assert!(text.contains("'<' found: [(5, 50)]"));
        assert!(text.contains("'>' found: []"));
        assert!(text.contains("Imagery 2020 <"));
    }
}
