use crate::align::{align_controls, ControlPair};
use crate::capture_name::capture_path;
use crate::config::{ScrapeConfig, ViewParams};
use crate::diagnostics::DiagnosticSink;
use crate::error::{PointList, ScrapeError};
use crate::geometry::{click_offset, map_to_viewport, Screenshot, ScreenshotPoint, Size, ViewportPoint};
use crate::ocr::{find_symbols, find_text, Arrow, OcrEngine};
use crate::preprocess::{preprocess, PreprocessParams};
use crate::stabilize::{Stabilized, StabilizationWaiter};
use crate::url_date::extract_date;
use crate::browser::BrowserDriver;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoricalState {
    Init,
    Navigated,
    HistoricalModeActive,
    OverlayDismissed,
    ControlsLocated,
    Stepping,
    Done,
    Failed,
}

fn log_state(state: HistoricalState) {
    log::info!("historical_state={state:?}");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The slider produced the same date twice in a row.
    DateRepeated,
    /// The date is on or before January 1 of the cutoff year.
    PastCutoff,
    /// The URL carried no decodable date.
    DateUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedCapture {
    pub date: NaiveDate,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeReport {
    pub view: ViewParams,
    pub controls: ControlPair,
    pub saved: Vec<SavedCapture>,
    pub stop_reason: StopReason,
    pub last_date: Option<NaiveDate>,
}

/// Runs `body` and then always closes the browser session and removes
/// `temp` (if given), regardless of how `body` ended.
pub fn with_session<D, T>(
    driver: &mut D,
    temp: Option<&Path>,
    body: impl FnOnce(&mut D) -> Result<T>,
) -> Result<T>
where
    D: BrowserDriver + ?Sized,
{
    let result = body(driver);
    let closed = driver.quit();
    if let Some(temp) = temp {
        if temp.exists() {
            if let Err(err) = fs::remove_file(temp) {
                log::warn!("failed to remove {}: {err}", temp.display());
            }
        }
    }
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.context("failed to close browser session")),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                log::warn!("failed to close browser session: {close_err:#}");
            }
            Err(err)
        }
    }
}

/// Maps a screenshot point into the viewport and clicks it, leaving the
/// pointer where it started.
pub fn press_at<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    screenshot: Size<Screenshot>,
    point: ScreenshotPoint,
) -> Result<ViewportPoint> {
    let viewport = driver.viewport_size()?;
    let mapped = map_to_viewport(point, screenshot, viewport);
    let (dx, dy) = click_offset(mapped);
    log::debug!("click {point} -> viewport {mapped}");
    driver.click_at_offset(dx, dy)?;
    Ok(mapped)
}

pub fn wait_for_stable_url<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    interval: Duration,
    max_attempts: u32,
) -> Result<Stabilized> {
    let stable =
        StabilizationWaiter::new(interval, max_attempts).wait(|| driver.current_url(), thread::sleep)?;
    log::debug!(
        "url settled={} after {} polls: {}",
        stable.settled,
        stable.polls,
        stable.url
    );
    Ok(stable)
}

/// Strictly after January 1 of `year`.
pub fn is_after_cutoff(date: NaiveDate, year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 1, 1).is_some_and(|cutoff| date > cutoff)
}

fn open_screenshot(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to read screenshot: {}", path.display()))
}

fn screenshot_size(image: &DynamicImage) -> Size<Screenshot> {
    let (w, h) = image.dimensions();
    Size::new(f64::from(w), f64::from(h))
}

/// Opens the view, enables historical imagery and walks the time slider
/// backwards, saving one capture per distinct date. The session is closed
/// and the detection screenshot deleted on every exit path.
pub fn run_historical<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    ocr: &dyn OcrEngine,
    sink: &dyn DiagnosticSink,
    config: &ScrapeConfig,
    view: &ViewParams,
) -> Result<ScrapeReport> {
    let temp = config.temp_screenshot_path();
    let scrape = HistoricalScrape {
        ocr,
        sink,
        config,
        view,
        temp: &temp,
    };
    let result = with_session(driver, Some(&temp), |driver| scrape.run(driver));
    log_state(if result.is_ok() {
        HistoricalState::Done
    } else {
        HistoricalState::Failed
    });
    result
}

struct HistoricalScrape<'a> {
    ocr: &'a dyn OcrEngine,
    sink: &'a dyn DiagnosticSink,
    config: &'a ScrapeConfig,
    view: &'a ViewParams,
    temp: &'a Path,
}

impl HistoricalScrape<'_> {
    fn run<D: BrowserDriver + ?Sized>(&self, driver: &mut D) -> Result<ScrapeReport> {
        log_state(HistoricalState::Init);
        let url = self.view.view_url(&self.config.viewer_url);
        log::info!("opening {url}");
        driver.navigate(&url)?;
        thread::sleep(self.config.initial_settle());
        self.wait(driver, self.config.stabilize_interval())?;
        log_state(HistoricalState::Navigated);

        driver.send_chord(self.config.shortcut_modifier, self.config.historical_shortcut)?;
        log_state(HistoricalState::HistoricalModeActive);

        self.dismiss_overlays(driver)?;
        log_state(HistoricalState::OverlayDismissed);

        let (controls, shot_size) = self.locate_controls(driver)?;
        log_state(HistoricalState::ControlsLocated);

        self.step_back(driver, controls, shot_size)
    }

    fn wait<D: BrowserDriver + ?Sized>(&self, driver: &mut D, interval: Duration) -> Result<Stabilized> {
        wait_for_stable_url(driver, interval, self.config.stabilize_attempts)
    }

    fn read_date<D: BrowserDriver + ?Sized>(&self, driver: &mut D) -> Result<Option<NaiveDate>> {
        Ok(extract_date(&driver.current_url()?))
    }

    fn dismiss_overlays<D: BrowserDriver + ?Sized>(&self, driver: &mut D) -> Result<()> {
        driver.save_screenshot(self.temp)?;
        let shot = open_screenshot(self.temp)?;
        let record = self.ocr.data(&shot)?;
        let hits = find_text(&record, &self.config.dismiss_label);
        if hits.is_empty() {
            log::debug!("no '{}' overlay found", self.config.dismiss_label);
        }
        for hit in hits {
            log::info!("dismissing overlay at {hit}");
            press_at(driver, screenshot_size(&shot), hit)?;
        }
        Ok(())
    }

    fn locate_controls<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Result<(ControlPair, Size<Screenshot>)> {
        driver.save_screenshot(self.temp)?;
        let raw = open_screenshot(self.temp)?;
        let params = PreprocessParams {
            region: self.config.region_of_interest,
            contrast_factor: self.config.contrast_factor,
            threshold: self.config.binarize_threshold,
        };
        let crop = preprocess(&raw, &params, self.sink);
        let (ox, oy) = crop.origin;
        let record = self
            .ocr
            .data(&DynamicImage::ImageLuma8(crop.image))?
            .translated(i64::from(ox), i64::from(oy));

        let anchors = find_text(&record, &self.config.anchor_label);
        let symbols = find_symbols(&record);
        log::debug!(
            "anchors={} '<'={} '>'={}",
            anchors.len(),
            symbols.previous.len(),
            symbols.next.len()
        );

        match align_controls(&anchors, &symbols, self.config.align_tolerance) {
            Some(pair) => {
                log::info!(
                    "controls: anchor {} previous {} next {}",
                    pair.anchor,
                    pair.previous,
                    pair.next
                );
                Ok((pair, screenshot_size(&raw)))
            }
            None => {
                self.sink.detection_miss("controls", &raw, &record);
                Err(ScrapeError::ControlsNotFound {
                    anchor_label: self.config.anchor_label.clone(),
                    anchors: PointList(anchors),
                    previous: PointList(symbols.previous),
                    next: PointList(symbols.next),
                    ocr_text: record.raw_text(),
                }
                .into())
            }
        }
    }

    fn step_back<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        controls: ControlPair,
        shot_size: Size<Screenshot>,
    ) -> Result<ScrapeReport> {
        // The initial URL has no date; one step back and forward makes the
        // viewer write it.
        press_at(driver, shot_size, controls.get(Arrow::Previous))?;
        press_at(driver, shot_size, controls.get(Arrow::Next))?;
        self.wait(driver, self.config.stabilize_interval())?;
        log_state(HistoricalState::Stepping);

        let cutoff = self.config.cutoff_year;
        let mut saved = Vec::new();
        let mut previous: Option<NaiveDate> = None;
        let mut date = self.read_date(driver)?;

        let stop_reason = loop {
            let Some(current) = date else {
                log::warn!("no snapshot date in the current URL; stopping");
                break StopReason::DateUnavailable;
            };
            if previous == Some(current) {
                break StopReason::DateRepeated;
            }
            if !is_after_cutoff(current, cutoff) {
                log::info!("{current} is not after {cutoff}-01-01; stopping");
                break StopReason::PastCutoff;
            }

            let date_text = current.format("%Y-%m-%d").to_string();
            let path = capture_path(&self.config.output_dir, self.view, &date_text)?;
            driver.save_screenshot(&path)?;
            log::info!("saved {}", path.display());
            saved.push(SavedCapture {
                date: current,
                path,
            });

            press_at(driver, shot_size, controls.get(Arrow::Previous))?;
            self.wait(driver, self.config.step_interval())?;
            previous = Some(current);
            date = self.read_date(driver)?;

            for attempt in 1..=self.config.confirm_rereads {
                if date != previous {
                    break;
                }
                log::info!(
                    "date {current} repeated; re-reading ({attempt}/{})",
                    self.config.confirm_rereads
                );
                self.wait(driver, self.config.step_interval())?;
                date = self.read_date(driver)?;
            }
        };

        log::info!("stopped: {stop_reason:?} after {} captures", saved.len());
        Ok(ScrapeReport {
            view: *self.view,
            controls,
            saved,
            stop_reason,
            last_date: date,
        })
    }
}
