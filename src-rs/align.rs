use crate::geometry::ScreenshotPoint;
use crate::ocr::{Arrow, SymbolHits};
use serde::Serialize;

/// The anchor label together with the previous/next arrows on its row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlPair {
    pub anchor: ScreenshotPoint,
    pub previous: ScreenshotPoint,
    pub next: ScreenshotPoint,
}

impl ControlPair {
    pub fn get(&self, arrow: Arrow) -> ScreenshotPoint {
        match arrow {
            Arrow::Previous => self.previous,
            Arrow::Next => self.next,
        }
    }
}

/// First anchor (in the given order) that has both arrows within
/// `tolerance` pixels vertically wins; each arrow is the first qualifying
/// hit in scan order, not the nearest one.
pub fn align_controls(
    anchors: &[ScreenshotPoint],
    symbols: &SymbolHits,
    tolerance: f64,
) -> Option<ControlPair> {
    anchors.iter().find_map(|anchor| {
        let on_row = |arrow: Arrow| {
            symbols
                .get(arrow)
                .iter()
                .copied()
                .find(|p| (p.y - anchor.y).abs() <= tolerance)
        };
        Some(ControlPair {
            anchor: *anchor,
            previous: on_row(Arrow::Previous)?,
            next: on_row(Arrow::Next)?,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> ScreenshotPoint {
        ScreenshotPoint::new(x, y)
    }

    #[test]
    fn aligns_symbols_on_anchor_row() {
        let symbols = SymbolHits {
            previous: vec![p(5.0, 5.0)],
            next: vec![p(60.0, 5.0)],
        };
        let pair = align_controls(&[p(10.0, 5.0)], &symbols, 10.0).unwrap();
        assert_eq!(pair.anchor, p(10.0, 5.0));
        assert_eq!(pair.get(Arrow::Previous), p(5.0, 5.0));
        assert_eq!(pair.get(Arrow::Next), p(60.0, 5.0));
    }

    #[test]
    fn symbols_out_of_tolerance_are_absent() {
        let symbols = SymbolHits {
            previous: vec![p(5.0, 50.0)],
            next: vec![p(60.0, 50.0)],
        };
        assert_eq!(align_controls(&[p(10.0, 5.0)], &symbols, 10.0), None);
    }

    #[test]
    fn one_missing_arrow_is_absent() {
        let symbols = SymbolHits {
            previous: vec![p(5.0, 5.0)],
            next: vec![p(60.0, 90.0)],
        };
        assert_eq!(align_controls(&[p(10.0, 5.0)], &symbols, 10.0), None);
    }

    #[test]
    fn tolerance_bound_is_inclusive() {
        let symbols = SymbolHits {
            previous: vec![p(5.0, 15.0)],
            next: vec![p(60.0, -5.0)],
        };
        assert!(align_controls(&[p(10.0, 5.0)], &symbols, 10.0).is_some());
        assert!(align_controls(&[p(10.0, 5.0)], &symbols, 9.5).is_none());
    }

    #[test]
    fn first_qualifying_anchor_and_symbols_win() {
        let symbols = SymbolHits {
            previous: vec![p(1.0, 300.0), p(400.0, 102.0), p(90.0, 100.0)],
            next: vec![p(500.0, 98.0), p(200.0, 100.0)],
        };
        let anchors = [p(10.0, 20.0), p(100.0, 100.0), p(100.0, 300.0)];
        let pair = align_controls(&anchors, &symbols, 5.0).unwrap();
        assert_eq!(pair.anchor, p(100.0, 100.0));
        assert_eq!(pair.previous, p(400.0, 102.0));
        assert_eq!(pair.next, p(500.0, 98.0));
    }

    #[test]
    fn no_anchors_is_absent() {
        let symbols = SymbolHits {
            previous: vec![p(5.0, 5.0)],
            next: vec![p(60.0, 5.0)],
        };
        assert!(align_controls(&[], &symbols, 10.0).is_none());
    }
}
