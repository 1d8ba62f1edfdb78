//! Frame composition
//!
//! `Compositor` holds the latest image of every source and assembles one
//! canvas-sized frame per call to [`Compositor::compose`]. Sources may be
//! updated from any thread; a compose reads whatever is current.

use super::canvas::{Canvas, Image, Rect, Size};
use super::layout::{aspect_fit, LayerKind};
use super::placeholder::{self, PlaceholderKind};
use super::{CompositorError, CompositorResult};
use crate::capture::{FrameRate, Rotation};
use crate::media::MediaTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Compositor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositorConfig {
    pub canvas: Size,
    pub frame_rate: FrameRate,
    /// Where the front camera is drawn
    pub front_rect: Rect,
    /// BGRA fill behind every layer
    pub background: [u8; 4],
    pub min_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
}

impl CompositorConfig {
    /// Front camera inset in the bottom-right quarter of `canvas`
    pub fn default_front_rect(canvas: Size) -> Rect {
        let width = canvas.width / 4;
        let height = canvas.height / 4;
        let margin = canvas.width / 48;
        Rect::new(
            (canvas.width - width - margin) as i32,
            (canvas.height - height - margin) as i32,
            width,
            height,
        )
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        let canvas = Size::new(1920, 1080);
        Self {
            canvas,
            frame_rate: FrameRate::Fps30,
            front_rect: Self::default_front_rect(canvas),
            background: [0, 0, 0, 255],
            min_bitrate_kbps: 1_500,
            max_bitrate_kbps: 6_000,
        }
    }
}

/// One assembled frame
#[derive(Debug, Clone)]
pub struct CompositeFrame {
    pub pts: MediaTime,
    pub image: Arc<Image>,
    /// Set when the frame is a diagnostic card
    pub placeholder: Option<PlaceholderKind>,
}

#[derive(Debug, Clone)]
struct RemoteFeed {
    image: Option<Arc<Image>>,
    active: bool,
}

#[derive(Debug, Clone, Default)]
struct Sources {
    background: Option<Arc<Image>>,
    media: Option<Arc<Image>>,
    remotes: BTreeMap<String, RemoteFeed>,
    rear: Option<(Arc<Image>, Rotation)>,
    front: Option<Arc<Image>>,
}

pub struct Compositor {
    config: CompositorConfig,
    front_rect: RwLock<Rect>,
    sources: RwLock<Sources>,
    last_frame: RwLock<Option<CompositeFrame>>,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            front_rect: RwLock::new(config.front_rect),
            config,
            sources: RwLock::new(Sources::default()),
            last_frame: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn canvas(&self) -> Size {
        self.config.canvas
    }

    pub fn set_background(&self, image: Image) {
        self.sources.write().background = Some(Arc::new(image));
    }

    pub fn clear_background(&self) {
        self.sources.write().background = None;
    }

    /// Pre-rendered media (slides, graphics) drawn above the background
    pub fn set_media(&self, image: Image) {
        self.sources.write().media = Some(Arc::new(image));
    }

    pub fn clear_media(&self) {
        self.sources.write().media = None;
    }

    /// Latest image of a remote feed. Registers the feed as inactive if new.
    pub fn set_remote_image(&self, id: &str, image: Image) {
        let mut sources = self.sources.write();
        sources
            .remotes
            .entry(id.to_string())
            .or_insert(RemoteFeed {
                image: None,
                active: false,
            })
            .image = Some(Arc::new(image));
    }

    pub fn set_remote_active(&self, id: &str, active: bool) {
        let mut sources = self.sources.write();
        let feed = sources.remotes.entry(id.to_string()).or_insert(RemoteFeed {
            image: None,
            active,
        });
        feed.active = active;
        tracing::info!("Remote feed {} {}", id, if active { "active" } else { "inactive" });
    }

    pub fn remove_remote(&self, id: &str) {
        self.sources.write().remotes.remove(id);
    }

    /// Number of remote feeds marked active
    pub fn active_remotes(&self) -> usize {
        self.sources.read().remotes.values().filter(|f| f.active).count()
    }

    /// Rear camera image, rotated by `rotation` before placement
    pub fn set_rear(&self, image: Image, rotation: Rotation) {
        self.sources.write().rear = Some((Arc::new(image), rotation));
    }

    pub fn clear_rear(&self) {
        self.sources.write().rear = None;
    }

    pub fn set_front(&self, image: Image) {
        self.sources.write().front = Some(Arc::new(image));
    }

    pub fn clear_front(&self) {
        self.sources.write().front = None;
    }

    pub fn front_rect(&self) -> Rect {
        *self.front_rect.read()
    }

    pub fn set_front_rect(&self, rect: Rect) {
        *self.front_rect.write() = rect;
    }

    /// Assemble the frame for `pts`
    ///
    /// The result is always exactly the canvas size. A frame that would not
    /// be is replaced by a placeholder card.
    pub fn compose(&self, pts: MediaTime) -> CompositeFrame {
        let sources = self.sources.read().clone();
        let canvas_size = self.config.canvas;
        let canvas_rect = Rect::at_origin(canvas_size);

        let active: Vec<&RemoteFeed> = sources.remotes.values().filter(|f| f.active).collect();
        let frame = if active.len() > 1 {
            self.placeholder_frame(pts, PlaceholderKind::MultiCameraUnavailable)
        } else {
            let mut canvas = Canvas::new(canvas_size, self.config.background);
            for layer in LayerKind::Z_ORDER {
                match layer {
                    LayerKind::Background => {
                        if let Some(image) = &sources.background {
                            canvas.draw(image, canvas_rect);
                        }
                    }
                    LayerKind::Media => {
                        if let Some(image) = &sources.media {
                            canvas.draw(image, aspect_fit(image.size(), canvas_rect));
                        }
                    }
                    LayerKind::Remote => {
                        if let Some(image) = active.first().and_then(|f| f.image.as_ref()) {
                            canvas.draw(image, aspect_fit(image.size(), canvas_rect));
                        }
                    }
                    LayerKind::Rear => {
                        if let Some((image, rotation)) = &sources.rear {
                            let upright = image.rotated(*rotation);
                            canvas.draw(&upright, aspect_fit(upright.size(), canvas_rect));
                        }
                    }
                    LayerKind::Front => {
                        if let Some(image) = &sources.front {
                            canvas.draw(image, self.front_rect());
                        }
                    }
                }
            }

            let extent = canvas.extent();
            if extent != canvas_rect || canvas.size() != canvas_size {
                tracing::error!(
                    "Composite extent {:?} does not match canvas {}",
                    extent,
                    canvas_size
                );
                self.placeholder_frame(pts, PlaceholderKind::CanvasMismatch { extent })
            } else {
                CompositeFrame {
                    pts,
                    image: Arc::new(canvas.into_image()),
                    placeholder: None,
                }
            }
        };

        *self.last_frame.write() = Some(frame.clone());
        frame
    }

    fn placeholder_frame(&self, pts: MediaTime, kind: PlaceholderKind) -> CompositeFrame {
        CompositeFrame {
            pts,
            image: Arc::new(placeholder::render(&kind, self.config.canvas)),
            placeholder: Some(kind),
        }
    }

    /// Most recently composed frame
    pub fn last_frame(&self) -> Option<CompositeFrame> {
        self.last_frame.read().clone()
    }

    /// Write the most recent frame to a PNG file
    pub fn snapshot_png(&self, path: &Path) -> CompositorResult<()> {
        let frame = self.last_frame().ok_or(CompositorError::NoFrame)?;
        let image = &frame.image;

        let mut rgba = image.data().to_vec();
        for px in rgba.chunks_exact_mut(4) {
            px.swap(0, 2);
        }

        let file = std::fs::File::create(path)?;
        let mut encoder =
            png::Encoder::new(std::io::BufWriter::new(file), image.width(), image.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| CompositorError::Png(format!("PNG header error: {}", e)))?;
        writer
            .write_image_data(&rgba)
            .map_err(|e| CompositorError::Png(format!("PNG write error: {}", e)))?;

        tracing::debug!("Wrote compositor snapshot to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [0, 0, 255, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [255, 0, 0, 255];

    fn small_config() -> CompositorConfig {
        let canvas = Size::new(64, 36);
        CompositorConfig {
            canvas,
            front_rect: Rect::new(48, 24, 12, 8),
            ..CompositorConfig::default()
        }
    }

    #[test]
    fn test_empty_sources_produce_background() {
        let compositor = Compositor::new(small_config());
        let frame = compositor.compose(MediaTime::ZERO);
        assert!(frame.placeholder.is_none());
        assert_eq!(frame.image.size(), Size::new(64, 36));
        assert_eq!(frame.image.pixel(10, 10), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_layers_draw_back_to_front() {
        let compositor = Compositor::new(small_config());
        compositor.set_background(Image::solid(Size::new(8, 8), RED));
        compositor.set_rear(Image::solid(Size::new(16, 9), GREEN), Rotation::Deg0);
        compositor.set_front(Image::solid(Size::new(4, 4), BLUE));

        let frame = compositor.compose(MediaTime::new(1, 30));
        assert!(frame.placeholder.is_none());
        // Rear fills the 16:9 canvas, front sits in its rect on top
        assert_eq!(frame.image.pixel(5, 5), Some(GREEN));
        assert_eq!(frame.image.pixel(50, 26), Some(BLUE));
    }

    #[test]
    fn test_rotated_rear_is_pillarboxed() {
        let compositor = Compositor::new(small_config());
        compositor.set_background(Image::solid(Size::new(4, 4), RED));
        compositor.set_rear(Image::solid(Size::new(16, 9), GREEN), Rotation::Deg90);

        let frame = compositor.compose(MediaTime::ZERO);
        assert_eq!(frame.image.pixel(32, 18), Some(GREEN));
        assert_eq!(frame.image.pixel(1, 18), Some(RED));
    }

    #[test]
    fn test_overflowing_front_rect_yields_mismatch_card() {
        let compositor = Compositor::new(small_config());
        compositor.set_front(Image::solid(Size::new(4, 4), BLUE));
        compositor.set_front_rect(Rect::new(60, 30, 16, 9));

        let frame = compositor.compose(MediaTime::ZERO);
        assert_eq!(frame.image.size(), Size::new(64, 36));
        match frame.placeholder {
            Some(PlaceholderKind::CanvasMismatch { extent }) => {
                assert_eq!(extent, Rect::new(0, 0, 76, 39));
            }
            other => panic!("unexpected placeholder {:?}", other),
        }
    }

    #[test]
    fn test_multiple_active_remotes_yield_unavailable_card() {
        let compositor = Compositor::new(small_config());
        compositor.set_remote_image("a", Image::solid(Size::new(16, 9), GREEN));
        compositor.set_remote_image("b", Image::solid(Size::new(16, 9), BLUE));
        compositor.set_remote_active("a", true);

        let single = compositor.compose(MediaTime::ZERO);
        assert!(single.placeholder.is_none());
        assert_eq!(single.image.pixel(5, 5), Some(GREEN));

        compositor.set_remote_active("b", true);
        assert_eq!(compositor.active_remotes(), 2);
        let multi = compositor.compose(MediaTime::new(1, 30));
        assert_eq!(multi.placeholder, Some(PlaceholderKind::MultiCameraUnavailable));
        assert_eq!(multi.image.size(), Size::new(64, 36));
    }

    #[test]
    fn test_snapshot_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        let compositor = Compositor::new(small_config());
        assert!(matches!(
            compositor.snapshot_png(&path),
            Err(CompositorError::NoFrame)
        ));

        compositor.set_background(Image::solid(Size::new(2, 2), RED));
        compositor.compose(MediaTime::ZERO);
        compositor.snapshot_png(&path).unwrap();

        let loaded = Image::load_png(&path).unwrap();
        assert_eq!(loaded.size(), Size::new(64, 36));
        assert_eq!(loaded.pixel(0, 0), Some(RED));
    }
}
