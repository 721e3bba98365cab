use crate::config::{ScrapeConfig, ViewParams};
use crate::ocr::OcrEngine;
use crate::scrape::{wait_for_stable_url, with_session};
use crate::browser::BrowserDriver;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::thread;

fn attribution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Data attribution (\d{1,2}/\d{1,2}/\d{4}(?:-\w+)?)").expect("static regex")
    })
}

/// The `M/D/YYYY` text following "Data attribution", as printed by the viewer.
pub fn find_attribution_date(text: &str) -> Option<String> {
    attribution_re()
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Loads the view once, saves a full-page screenshot to `screenshot` and
/// reads the attribution date from it.
pub fn read_attribution_date<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    ocr: &dyn OcrEngine,
    config: &ScrapeConfig,
    view: &ViewParams,
    screenshot: &Path,
) -> Result<Option<String>> {
    with_session(driver, None, |driver| {
        driver.navigate(&view.view_url(&config.viewer_url))?;
        thread::sleep(config.initial_settle());
        wait_for_stable_url(driver, config.attribution_interval(), config.stabilize_attempts)?;
        thread::sleep(config.initial_settle());
        driver.save_screenshot(screenshot)
    })?;

    let image = image::open(screenshot)
        .with_context(|| format!("failed to read screenshot: {}", screenshot.display()))?;
    let text = ocr.text(&image)?;
    let date = find_attribution_date(&text);
    match date.as_deref() {
        Some(found) => log::info!("date found: {found}"),
        None => log::warn!(
            "date not found; inspect {} to debug",
            screenshot.display()
        ),
    }
    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::tests::{FakeDriver, FakeOcr};
    use tempfile::tempdir;

    #[test]
    fn extracts_attribution_date() {
        let text = "Google Earth\nImagery 2020 | Data attribution 7/1/2019 Camera: 278 m";
        assert_eq!(find_attribution_date(text), Some("7/1/2019".to_string()));
    }

    #[test]
    fn keeps_range_suffix() {
        let text = "Data attribution 12/31/2018-present";
        assert_eq!(find_attribution_date(text), Some("12/31/2018-present".to_string()));
    }

    #[test]
    fn missing_attribution_is_absent() {
        assert_eq!(find_attribution_date("Data 7/1/2019"), None);
    }

    #[test]
    fn reads_date_from_page_screenshot() {
        let dir = tempdir().unwrap();
        let config = ScrapeConfig {
            initial_settle_ms: 0,
            attribution_interval_ms: 0,
            ..ScrapeConfig::default()
        };
        let mut driver = FakeDriver::new(Vec::new());
        let mut ocr = FakeOcr::new(Vec::new());
        ocr.text = "Data attribution 3/4/2021".to_string();
        let shot = dir.path().join("page_screenshot.png");

        let date = read_attribution_date(&mut driver, &ocr, &config, &ViewParams::new(1.5, 2.5), &shot)
            .unwrap();

        assert_eq!(date.as_deref(), Some("3/4/2021"));
        assert!(shot.exists());
        assert_eq!(driver.screenshots, vec![shot.clone()]);
        assert_eq!(driver.quit_calls, 1);
    }
}
