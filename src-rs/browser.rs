use crate::config::{Modifier, ScrapeConfig};
use crate::geometry::{Size, Viewport};
use anyhow::{anyhow, bail, Context, Result};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use reqwest::blocking::Client;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

const DISCOVERY_ATTEMPTS: u32 = 5;
const DISCOVERY_DELAY_MS: u64 = 500;

/// The browser operations the scrape needs. Exactly one owner drives a
/// session; `quit` must be safe to call more than once.
pub trait BrowserDriver {
    fn navigate(&mut self, url: &str) -> Result<()>;
    fn current_url(&mut self) -> Result<String>;
    fn save_screenshot(&mut self, path: &Path) -> Result<()>;
    fn viewport_size(&mut self) -> Result<Size<Viewport>>;
    fn send_chord(&mut self, modifier: Modifier, key: char) -> Result<()>;
    /// Move the pointer by `(dx, dy)`, click, then move it back by the same
    /// offset.
    fn click_at_offset(&mut self, dx: i64, dy: i64) -> Result<()>;
    fn quit(&mut self) -> Result<()>;
}

struct LiveBrowser {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    attached: bool,
}

/// Chrome driven over the DevTools protocol. The async client runs on a
/// private current-thread runtime, so every call blocks until the browser
/// answers.
pub struct ChromeSession {
    runtime: Runtime,
    live: Option<LiveBrowser>,
    pointer: (f64, f64),
}

impl ChromeSession {
    /// Launches Chrome, or attaches to the one at `devtools_url` when set,
    /// and opens the single working tab.
    pub fn launch(config: &ScrapeConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start browser runtime")?;

        let attached = config.devtools_url.is_some();
        let (browser, handler) = match config.devtools_url.as_deref() {
            Some(url) => {
                let ws_url = discover_ws_url(url)?;
                log::info!("attaching to browser at {ws_url}");
                runtime
                    .block_on(Browser::connect(ws_url.clone()))
                    .with_context(|| format!("failed to connect to browser at {ws_url}"))?
            }
            None => runtime
                .block_on(Browser::launch(browser_config(config)?))
                .context("failed to launch browser")?,
        };
        let handler = runtime.spawn(drive_events(handler));

        let page = match runtime.block_on(browser.new_page("about:blank")) {
            Ok(page) => page,
            Err(err) => {
                handler.abort();
                return Err(anyhow!(err).context("failed to open a browser tab"));
            }
        };
        log::info!("browser session opened");

        Ok(Self {
            runtime,
            live: Some(LiveBrowser {
                browser,
                page,
                handler,
                attached,
            }),
            pointer: (0.0, 0.0),
        })
    }

    fn page(&self) -> Result<&Page> {
        self.live
            .as_ref()
            .map(|live| &live.page)
            .ok_or_else(|| anyhow!("browser session already closed"))
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(mut live) = self.live.take() else {
            return Ok(());
        };
        let result = if live.attached {
            // Leave someone else's browser running; only our tab goes.
            self.runtime
                .block_on(live.page.close())
                .context("failed to close browser tab")
        } else {
            self.runtime.block_on(async {
                live.browser.close().await.context("failed to close browser")?;
                live.browser
                    .wait()
                    .await
                    .context("failed to reap browser process")?;
                Ok::<(), anyhow::Error>(())
            })
        };
        live.handler.abort();
        log::info!("browser session closed");
        result
    }
}

impl BrowserDriver for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        let page = self.page()?;
        self.runtime
            .block_on(page.goto(url))
            .with_context(|| format!("failed to navigate to {url}"))?;
        Ok(())
    }

    fn current_url(&mut self) -> Result<String> {
        let page = self.page()?;
        let url = self
            .runtime
            .block_on(page.url())
            .context("failed to read the current URL")?;
        Ok(url.unwrap_or_default())
    }

    fn save_screenshot(&mut self, path: &Path) -> Result<()> {
        let page = self.page()?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let bytes = self
            .runtime
            .block_on(page.screenshot(params))
            .context("failed to capture screenshot")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create parent directory: {}", parent.display())
                })?;
            }
        }
        fs::write(path, bytes)
            .with_context(|| format!("failed to write screenshot: {}", path.display()))
    }

    fn viewport_size(&mut self) -> Result<Size<Viewport>> {
        let page = self.page()?;
        let result = self
            .runtime
            .block_on(page.evaluate("[window.innerWidth, window.innerHeight]"))
            .context("failed to read the viewport size")?;
        let value = result
            .value()
            .ok_or_else(|| anyhow!("viewport script returned nothing"))?;
        parse_viewport(value)
    }

    fn send_chord(&mut self, modifier: Modifier, key: char) -> Result<()> {
        let page = self.page()?;
        for event in chord_events(modifier, key)? {
            self.runtime
                .block_on(page.execute(event))
                .with_context(|| format!("failed to send {modifier:?}+{key}"))?;
        }
        Ok(())
    }

    fn click_at_offset(&mut self, dx: i64, dy: i64) -> Result<()> {
        let events = click_events(self.pointer, dx, dy)?;
        let page = self.page()?;
        for event in &events {
            self.runtime
                .block_on(page.execute(event.clone()))
                .with_context(|| format!("failed to click at offset ({dx}, {dy})"))?;
        }
        if let Some(last) = events.last() {
            self.pointer = (last.x, last.y);
        }
        Ok(())
    }

    fn quit(&mut self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("browser shutdown on drop failed: {err:#}");
        }
    }
}

async fn drive_events(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if let Err(err) = event {
            log::warn!("browser event error: {err}");
        }
    }
    log::debug!("browser event stream ended");
}

fn browser_config(config: &ScrapeConfig) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder().viewport(None);
    if !config.headless {
        builder = builder.with_head();
    }
    if let Some((w, h)) = config.window_size {
        builder = builder.window_size(w, h);
    }
    if let Some(binary) = config.browser_binary.as_ref() {
        builder = builder.chrome_executable(binary);
    }
    for arg in launch_args(config) {
        builder = builder.arg(arg);
    }
    builder
        .build()
        .map_err(|err| anyhow!("invalid browser config: {err}"))
}

fn launch_args(config: &ScrapeConfig) -> Vec<String> {
    let mut args = vec!["--no-first-run".to_string()];
    if config.window_size.is_none() {
        args.push("--start-maximized".to_string());
    }
    args
}

/// `ws://` URLs are used as-is; an `http://host:port` endpoint is asked for
/// its websocket URL on `/json/version`.
fn discover_ws_url(url: &str) -> Result<String> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return Ok(url.to_string());
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let version_url = format!("{}/json/version", url.trim_end_matches('/'));
    let mut last_error = String::from("no response");
    for attempt in 1..=DISCOVERY_ATTEMPTS {
        match client
            .get(&version_url)
            .send()
            .and_then(|resp| resp.json::<Value>())
        {
            Ok(body) => return ws_url_from_version(&body),
            Err(err) => last_error = err.to_string(),
        }
        log::debug!("devtools endpoint not ready (attempt {attempt}/{DISCOVERY_ATTEMPTS})");
        thread::sleep(Duration::from_millis(DISCOVERY_DELAY_MS));
    }
    bail!("no devtools endpoint at {version_url} after {DISCOVERY_ATTEMPTS} attempts: {last_error}")
}

fn ws_url_from_version(body: &Value) -> Result<String> {
    body.get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no webSocketDebuggerUrl in {body}"))
}

/// `(key, code, windows virtual key code, modifier bit)`
fn modifier_key(modifier: Modifier) -> (&'static str, &'static str, i64, i64) {
    match modifier {
        Modifier::Control => ("Control", "ControlLeft", 17, 2),
        Modifier::Command => ("Meta", "MetaLeft", 91, 4),
    }
}

fn key_event(
    kind: DispatchKeyEventType,
    key: &str,
    code: &str,
    virtual_code: i64,
    modifiers: i64,
) -> Result<DispatchKeyEventParams> {
    DispatchKeyEventParams::builder()
        .r#type(kind)
        .key(key)
        .code(code)
        .windows_virtual_key_code(virtual_code)
        .modifiers(modifiers)
        .build()
        .map_err(|err| anyhow!("invalid key event: {err}"))
}

/// Modifier down, key down, key up, modifier up.
fn chord_events(modifier: Modifier, key: char) -> Result<Vec<DispatchKeyEventParams>> {
    let (mod_key, mod_code, mod_vk, bit) = modifier_key(modifier);
    let upper = key.to_ascii_uppercase();
    let key_text = key.to_string();
    let key_code = if upper.is_ascii_alphabetic() {
        format!("Key{upper}")
    } else if upper.is_ascii_digit() {
        format!("Digit{upper}")
    } else {
        key_text.clone()
    };
    let key_vk = i64::from(u32::from(upper));
    Ok(vec![
        key_event(DispatchKeyEventType::RawKeyDown, mod_key, mod_code, mod_vk, bit)?,
        key_event(DispatchKeyEventType::RawKeyDown, &key_text, &key_code, key_vk, bit)?,
        key_event(DispatchKeyEventType::KeyUp, &key_text, &key_code, key_vk, bit)?,
        key_event(DispatchKeyEventType::KeyUp, mod_key, mod_code, mod_vk, 0)?,
    ])
}

fn mouse_event(
    kind: DispatchMouseEventType,
    x: f64,
    y: f64,
    pressed: bool,
) -> Result<DispatchMouseEventParams> {
    let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
    if pressed {
        builder = builder.button(MouseButton::Left).click_count(1);
    }
    builder
        .build()
        .map_err(|err| anyhow!("invalid mouse event: {err}"))
}

/// Move from `pointer` by the offset, press, release, then move back so the
/// pointer ends where it started.
fn click_events(pointer: (f64, f64), dx: i64, dy: i64) -> Result<Vec<DispatchMouseEventParams>> {
    let (x0, y0) = pointer;
    let (x1, y1) = (x0 + dx as f64, y0 + dy as f64);
    Ok(vec![
        mouse_event(DispatchMouseEventType::MouseMoved, x1, y1, false)?,
        mouse_event(DispatchMouseEventType::MousePressed, x1, y1, true)?,
        mouse_event(DispatchMouseEventType::MouseReleased, x1, y1, true)?,
        mouse_event(DispatchMouseEventType::MouseMoved, x0, y0, false)?,
    ])
}

fn parse_viewport(value: &Value) -> Result<Size<Viewport>> {
    let dims = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| anyhow!("unexpected viewport payload: {value}"))?;
    let width = dims[0]
        .as_f64()
        .ok_or_else(|| anyhow!("viewport width is not numeric: {value}"))?;
    let height = dims[1]
        .as_f64()
        .ok_or_else(|| anyhow!("viewport height is not numeric: {value}"))?;
    Ok(Size::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn click_returns_pointer_to_start() {
        let events = click_events((0.0, 0.0), 120, -35).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.r#type.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                DispatchMouseEventType::MouseMoved,
                DispatchMouseEventType::MousePressed,
                DispatchMouseEventType::MouseReleased,
                DispatchMouseEventType::MouseMoved,
            ]
        );
        assert_eq!((events[1].x, events[1].y), (120.0, -35.0));
        assert_eq!((events[3].x, events[3].y), (0.0, 0.0));
        assert_eq!(events[1].button, Some(MouseButton::Left));
        assert_eq!(events[0].button, None);
    }

    #[test]
    fn click_offset_is_relative_to_pointer() {
        let events = click_events((10.0, 20.0), 5, 5).unwrap();
        assert_eq!((events[2].x, events[2].y), (15.0, 25.0));
        assert_eq!((events[3].x, events[3].y), (10.0, 20.0));
    }

    #[test]
    fn chord_wraps_key_in_modifier() {
        let events = chord_events(Modifier::Command, 'h').unwrap();
        let keys: Vec<&str> = events.iter().filter_map(|e| e.key.as_deref()).collect();
        assert_eq!(keys, vec!["Meta", "h", "h", "Meta"]);
        assert_eq!(events[1].code.as_deref(), Some("KeyH"));
        assert_eq!(events[1].windows_virtual_key_code, Some(72));
        assert_eq!(events[1].modifiers, Some(4));

        let control = chord_events(Modifier::Control, 'h').unwrap();
        assert_eq!(control[0].key.as_deref(), Some("Control"));
        assert_eq!(control[2].modifiers, Some(2));
        assert_eq!(control[3].modifiers, Some(0));
    }

    #[test]
    fn launch_args_follow_window_config() {
        let mut config = ScrapeConfig::default();
        assert!(launch_args(&config).contains(&"--start-maximized".to_string()));
        config.window_size = Some((1280, 1024));
        assert!(!launch_args(&config).contains(&"--start-maximized".to_string()));
    }

    #[test]
    fn websocket_url_is_used_directly() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(discover_ws_url(url).unwrap(), url);
    }

    #[test]
    fn reads_websocket_url_from_version_payload() {
        let body = json!({
            "Browser": "Chrome/126.0",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/xyz"
        });
        assert_eq!(
            ws_url_from_version(&body).unwrap(),
            "ws://127.0.0.1:9222/devtools/browser/xyz"
        );
        assert!(ws_url_from_version(&json!({"Browser": "x"})).is_err());
    }

    #[test]
    fn parses_viewport_pair() {
        let size = parse_viewport(&json!([1440, 789])).unwrap();
        assert_eq!((size.width, size.height), (1440.0, 789.0));
        assert!(parse_viewport(&json!({"w": 1})).is_err());
        assert!(parse_viewport(&json!([1, "x"])).is_err());
    }
}
