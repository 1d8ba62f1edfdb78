//! Diagnostic placeholder frames
//!
//! When a frame cannot be composed correctly, a full-canvas card with a
//! short message is sent instead so the problem is visible downstream.

use super::canvas::{Canvas, Image, Rect, Size};
use super::font::{self, GLYPH_HEIGHT};
use serde::Serialize;

const RED: [u8; 4] = [40, 40, 200, 255];
const AMBER: [u8; 4] = [0, 176, 255, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Why a frame was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PlaceholderKind {
    /// The composed extent did not match the canvas
    CanvasMismatch { extent: Rect },
    /// More than one remote feed was active
    MultiCameraUnavailable,
}

impl PlaceholderKind {
    pub fn message(&self) -> String {
        match self {
            PlaceholderKind::CanvasMismatch { extent } => {
                format!("CANVAS MISMATCH {}", extent.size())
            }
            PlaceholderKind::MultiCameraUnavailable => "MULTI-CAMERA MODE NOT AVAILABLE".to_string(),
        }
    }

    fn colors(&self) -> ([u8; 4], [u8; 4]) {
        match self {
            PlaceholderKind::CanvasMismatch { .. } => (RED, WHITE),
            PlaceholderKind::MultiCameraUnavailable => (AMBER, BLACK),
        }
    }
}

/// Render the card for `kind` at exactly `size`
pub fn render(kind: &PlaceholderKind, size: Size) -> Image {
    let (card, ink) = kind.colors();
    let mut canvas = Canvas::new(size, card);

    let mut lines = vec![kind.message()];
    if let PlaceholderKind::CanvasMismatch { .. } = kind {
        lines.push(format!("EXPECTED {}", size));
    }

    let widest = lines
        .iter()
        .map(|line| font::text_width(line, 1))
        .max()
        .unwrap_or(1)
        .max(1);
    let line_count = lines.len() as u32;
    let scale = ((size.width * 9 / 10) / widest)
        .min(size.height / (GLYPH_HEIGHT * 2 * line_count).max(1))
        .max(1);

    let line_height = GLYPH_HEIGHT * scale * 2;
    let block_height = line_height * line_count;
    let top = (size.height as i32 - block_height as i32) / 2 + (GLYPH_HEIGHT * scale / 2) as i32;
    for (i, line) in lines.iter().enumerate() {
        let width = font::text_width(line, scale);
        let x = (size.width as i32 - width as i32) / 2;
        let y = top + (i as u32 * line_height) as i32;
        font::draw_text(&mut canvas, line, x.max(0), y.max(0), scale, ink);
    }

    canvas.into_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_matches_canvas() {
        let size = Size::new(320, 180);
        let kind = PlaceholderKind::CanvasMismatch {
            extent: Rect::new(0, 0, 400, 180),
        };
        let image = render(&kind, size);
        assert_eq!(image.size(), size);
        assert_eq!(image.pixel(0, 0), Some(RED));
        assert!(image.data().chunks(4).any(|px| px == WHITE));
    }

    #[test]
    fn test_messages() {
        let kind = PlaceholderKind::CanvasMismatch {
            extent: Rect::new(0, 0, 1920, 1200),
        };
        assert_eq!(kind.message(), "CANVAS MISMATCH 1920x1200");
        assert_eq!(
            PlaceholderKind::MultiCameraUnavailable.message(),
            "MULTI-CAMERA MODE NOT AVAILABLE"
        );
        let amber = render(&PlaceholderKind::MultiCameraUnavailable, Size::new(64, 36));
        assert_eq!(amber.pixel(0, 0), Some(AMBER));
    }
}
