use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Pixel space of a captured screenshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screenshot {}

/// Pixel space of the live browser viewport (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewport {}

/// A point tagged with the pixel space it lives in. Points from different
/// spaces cannot be mixed; `map_to_viewport` is the only bridge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Point<S> {
    pub x: f64,
    pub y: f64,
    #[serde(skip)]
    space: PhantomData<S>,
}

impl<S> Point<S> {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }
}

impl<S> fmt::Display for Point<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Size<S> {
    pub width: f64,
    pub height: f64,
    #[serde(skip)]
    space: PhantomData<S>,
}

impl<S> Size<S> {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            space: PhantomData,
        }
    }
}

pub type ScreenshotPoint = Point<Screenshot>;
pub type ViewportPoint = Point<Viewport>;

/// Scales each axis independently by `viewport / screenshot`. Aspect ratios
/// may differ; there is no further correction.
pub fn map_to_viewport(
    point: ScreenshotPoint,
    screenshot: Size<Screenshot>,
    viewport: Size<Viewport>,
) -> ViewportPoint {
    let scale_x = if screenshot.width > 0.0 {
        viewport.width / screenshot.width
    } else {
        0.0
    };
    let scale_y = if screenshot.height > 0.0 {
        viewport.height / screenshot.height
    } else {
        0.0
    };
    ViewportPoint::new(point.x * scale_x, point.y * scale_y)
}

/// Relative pointer offset sent to the browser for a mapped click. The same
/// rounded pair is used for the outbound and the return move, so the net
/// displacement is always zero.
pub fn click_offset(point: ViewportPoint) -> (i64, i64) {
    (point.x.round() as i64, point.y.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_each_axis_independently() {
        let mapped = map_to_viewport(
            ScreenshotPoint::new(50.0, 50.0),
            Size::new(100.0, 100.0),
            Size::new(200.0, 400.0),
        );
        assert_eq!(mapped, ViewportPoint::new(100.0, 200.0));
    }

    #[test]
    fn mapping_is_linear() {
        let shot = Size::new(2560.0, 1600.0);
        let view = Size::new(1280.0, 800.0);
        let a = map_to_viewport(ScreenshotPoint::new(100.0, 40.0), shot, view);
        let b = map_to_viewport(ScreenshotPoint::new(200.0, 80.0), shot, view);
        assert_eq!(b.x, a.x * 2.0);
        assert_eq!(b.y, a.y * 2.0);
        assert_eq!(a, ViewportPoint::new(50.0, 20.0));
    }

    #[test]
    fn zero_sized_screenshot_maps_to_origin() {
        let mapped = map_to_viewport(
            ScreenshotPoint::new(10.0, 10.0),
            Size::new(0.0, 0.0),
            Size::new(800.0, 600.0),
        );
        assert_eq!(mapped, ViewportPoint::new(0.0, 0.0));
    }

    #[test]
    fn click_offset_rounds() {
        assert_eq!(click_offset(ViewportPoint::new(10.4, 19.6)), (10, 20));
    }
}
