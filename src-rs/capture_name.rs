use crate::config::ViewParams;
use crate::error::ScrapeError;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Deterministic file name for one snapshot: coordinates at six decimals with
/// `.` replaced by `_`, the date compacted to `YYYYMMDD`.
pub fn capture_name(params: &ViewParams, date: &str) -> Result<String, ScrapeError> {
    let date = parse_capture_date(date)?;
    let latitude = format!("{:.6}", params.latitude).replace('.', "_");
    let longitude = format!("{:.6}", params.longitude).replace('.', "_");
    Ok(format!(
        "geo_{latitude}_{longitude}_alt{}_view{}_dir{}_tilt{}_date{}.png",
        params.altitude,
        params.angle_of_view,
        params.direction,
        params.tilt,
        date.format("%Y%m%d")
    ))
}

pub fn capture_path(
    folder: &Path,
    params: &ViewParams,
    date: &str,
) -> Result<PathBuf, ScrapeError> {
    Ok(folder.join(capture_name(params, date)?))
}

fn parse_capture_date(date: &str) -> Result<NaiveDate, ScrapeError> {
    let bytes = date.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return Err(ScrapeError::InvalidCaptureDate(date.to_string()));
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ScrapeError::InvalidCaptureDate(date.to_string()))
}
