//! Layer ordering and placement

use super::canvas::{Rect, Size};
use serde::{Deserialize, Serialize};

/// Composite layers, back to front
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerKind {
    Background,
    Media,
    Remote,
    Rear,
    Front,
}

impl LayerKind {
    pub const Z_ORDER: [LayerKind; 5] = [
        LayerKind::Background,
        LayerKind::Media,
        LayerKind::Remote,
        LayerKind::Rear,
        LayerKind::Front,
    ];
}

/// Largest rectangle with `content`'s aspect ratio centered inside `bounds`
pub fn aspect_fit(content: Size, bounds: Rect) -> Rect {
    if content.is_empty() || bounds.is_empty() {
        return Rect::new(bounds.x, bounds.y, 0, 0);
    }
    let scale = f64::min(
        bounds.width as f64 / content.width as f64,
        bounds.height as f64 / content.height as f64,
    );
    let width = ((content.width as f64 * scale).round() as u32).clamp(1, bounds.width);
    let height = ((content.height as f64 * scale).round() as u32).clamp(1, bounds.height);
    Rect::new(
        bounds.x + ((bounds.width - width) / 2) as i32,
        bounds.y + ((bounds.height - height) / 2) as i32,
        width,
        height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_order_is_sorted() {
        let mut sorted = LayerKind::Z_ORDER;
        sorted.sort();
        assert_eq!(sorted, LayerKind::Z_ORDER);
        assert!(LayerKind::Background < LayerKind::Front);
    }

    #[test]
    fn test_aspect_fit_pillarboxes_portrait() {
        let fitted = aspect_fit(Size::new(1080, 1920), Rect::new(0, 0, 1920, 1080));
        assert_eq!(fitted.height, 1080);
        assert_eq!(fitted.width, 608);
        assert_eq!(fitted.x, (1920 - 608) / 2);
        assert_eq!(fitted.y, 0);
    }

    #[test]
    fn test_aspect_fit_same_ratio_fills() {
        let bounds = Rect::new(10, 20, 640, 360);
        assert_eq!(aspect_fit(Size::new(1920, 1080), bounds), bounds);
    }
}
