//! Canvas geometry and BGRA images
//!
//! Every image in the compositor is tightly packed 8-bit BGRA. Layers are
//! drawn onto a `Canvas` with alpha-over blending; the canvas remembers the
//! rectangle each layer was placed at so the frame's extent can be checked.

use super::{CompositorError, CompositorResult};
use crate::capture::Rotation;
use crate::media::{MediaSample, PixelFormat};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const BYTES_PER_PIXEL: usize = 4;

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle of `size` at the origin
    pub const fn at_origin(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, (right - x as i64) as u32, (bottom - y as i64) as u32)
    }
}

/// A BGRA image
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    /// Wrap BGRA bytes. Returns `None` when the length does not match.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// An image filled with one BGRA color
    pub fn solid(size: Size, bgra: [u8; 4]) -> Self {
        let pixels = size.width as usize * size.height as usize;
        Self {
            width: size.width,
            height: size.height,
            data: bgra.repeat(pixels),
        }
    }

    /// Copy a BGRA or RGBA video sample into an image
    pub fn from_sample(sample: &MediaSample) -> Option<Self> {
        let format = sample.video_format()?;
        let mut data = sample.payload.to_vec();
        match format.pixel_format {
            PixelFormat::Bgra8 => {}
            PixelFormat::Rgba8 => swap_red_blue(&mut data),
            PixelFormat::Nv12 | PixelFormat::P010 => return None,
        }
        Self::new(format.width, format.height, data)
    }

    /// Decode an RGB or RGBA PNG file
    pub fn load_png(path: &Path) -> CompositorResult<Self> {
        let file = std::fs::File::open(path)?;
        let mut reader = png::Decoder::new(file)
            .read_info()
            .map_err(|e| CompositorError::Png(format!("PNG decode error: {}", e)))?;

        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut buf)
            .map_err(|e| CompositorError::Png(format!("PNG frame error: {}", e)))?;

        let mut data = match info.color_type {
            png::ColorType::Rgba => buf[..info.buffer_size()].to_vec(),
            png::ColorType::Rgb => {
                let rgb = &buf[..info.buffer_size()];
                let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
                for chunk in rgb.chunks(3) {
                    rgba.extend_from_slice(chunk);
                    rgba.push(255);
                }
                rgba
            }
            other => {
                return Err(CompositorError::Png(format!(
                    "Unsupported PNG color type: {:?}",
                    other
                )))
            }
        };
        swap_red_blue(&mut data);

        Self::new(info.width, info.height, data)
            .ok_or_else(|| CompositorError::Png("PNG buffer size mismatch".to_string()))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// BGRA value at a pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut px = [0; 4];
        px.copy_from_slice(&self.data[idx..idx + BYTES_PER_PIXEL]);
        Some(px)
    }

    // The image crate only sees four 8-bit channels; the order is irrelevant
    // to rotation and resampling.
    fn to_buffer(&self) -> Option<ImageBuffer<Rgba<u8>, Vec<u8>>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.clone())
    }

    fn from_buffer(buffer: ImageBuffer<Rgba<u8>, Vec<u8>>) -> Self {
        Self {
            width: buffer.width(),
            height: buffer.height(),
            data: buffer.into_raw(),
        }
    }

    /// Rotate clockwise by a quarter-turn multiple
    pub fn rotated(&self, rotation: Rotation) -> Image {
        let Some(buffer) = self.to_buffer() else {
            return self.clone();
        };
        match rotation {
            Rotation::Deg0 => self.clone(),
            Rotation::Deg90 => Self::from_buffer(imageops::rotate90(&buffer)),
            Rotation::Deg180 => Self::from_buffer(imageops::rotate180(&buffer)),
            Rotation::Deg270 => Self::from_buffer(imageops::rotate270(&buffer)),
        }
    }

    /// Resample to `size`
    pub fn scaled(&self, size: Size) -> Image {
        if size == self.size() || size.is_empty() {
            return self.clone();
        }
        match self.to_buffer() {
            Some(buffer) => Self::from_buffer(imageops::resize(
                &buffer,
                size.width,
                size.height,
                FilterType::Triangle,
            )),
            None => self.clone(),
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(BYTES_PER_PIXEL) {
        px.swap(0, 2);
    }
}

/// Drawing surface for one composite frame
pub struct Canvas {
    image: Image,
    extent: Rect,
}

impl Canvas {
    /// A canvas filled with `background`
    pub fn new(size: Size, background: [u8; 4]) -> Self {
        Self {
            image: Image::solid(size, background),
            extent: Rect::at_origin(size),
        }
    }

    pub fn size(&self) -> Size {
        self.image.size()
    }

    /// Union of every rectangle drawn so far, including the base fill
    pub fn extent(&self) -> Rect {
        self.extent
    }

    /// Draw `image` scaled into `dest` with alpha-over blending
    pub fn draw(&mut self, image: &Image, dest: Rect) {
        if dest.is_empty() || image.size().is_empty() {
            return;
        }
        self.extent = self.extent.union(&dest);

        let scaled;
        let src = if image.size() == dest.size() {
            image
        } else {
            scaled = image.scaled(dest.size());
            &scaled
        };

        let canvas_width = self.image.width as i64;
        let canvas_height = self.image.height as i64;
        for sy in 0..src.height as i64 {
            let y = dest.y as i64 + sy;
            if y < 0 || y >= canvas_height {
                continue;
            }
            for sx in 0..src.width as i64 {
                let x = dest.x as i64 + sx;
                if x < 0 || x >= canvas_width {
                    continue;
                }
                let src_idx = (sy as usize * src.width as usize + sx as usize) * BYTES_PER_PIXEL;
                let dst_idx = (y as usize * canvas_width as usize + x as usize) * BYTES_PER_PIXEL;
                blend(
                    &src.data[src_idx..src_idx + BYTES_PER_PIXEL],
                    &mut self.image.data[dst_idx..dst_idx + BYTES_PER_PIXEL],
                );
            }
        }
    }

    /// Fill a rectangle with an opaque color
    pub fn fill_rect(&mut self, rect: Rect, bgra: [u8; 4]) {
        if rect.is_empty() {
            return;
        }
        self.draw(&Image::solid(rect.size(), bgra), rect);
    }

    pub fn into_image(self) -> Image {
        self.image
    }
}

fn blend(src: &[u8], dst: &mut [u8]) {
    let alpha = src[3] as u32;
    if alpha == 0 {
        return;
    }
    if alpha == 255 {
        dst.copy_from_slice(src);
        return;
    }
    let inverse = 255 - alpha;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * inverse + 127) / 255) as u8;
    }
    dst[3] = (alpha + (dst[3] as u32 * inverse + 127) / 255).min(255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, -5, 10, 10);
        assert_eq!(a.union(&b), Rect::new(0, -5, 15, 15));
        assert_eq!(a.union(&Rect::new(3, 3, 0, 0)), a);
    }

    #[test]
    fn test_image_rejects_wrong_length() {
        assert!(Image::new(2, 2, vec![0; 15]).is_none());
        assert!(Image::new(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let mut data = vec![0u8; 3 * 2 * 4];
        // Mark the top-left pixel
        data[..4].copy_from_slice(&[1, 2, 3, 255]);
        let image = Image::new(3, 2, data).unwrap();

        let rotated = image.rotated(Rotation::Deg90);
        assert_eq!(rotated.size(), Size::new(2, 3));
        // Clockwise: top-left moves to top-right
        assert_eq!(rotated.pixel(1, 0), Some([1, 2, 3, 255]));

        assert_eq!(image.rotated(Rotation::Deg180).size(), Size::new(3, 2));
    }

    #[test]
    fn test_draw_blends_and_clips() {
        let mut canvas = Canvas::new(Size::new(4, 4), [0, 0, 0, 255]);
        let half_white = Image::solid(Size::new(2, 2), [255, 255, 255, 128]);
        canvas.draw(&half_white, Rect::new(3, 3, 2, 2));

        assert_eq!(canvas.extent(), Rect::new(0, 0, 5, 5));
        let image = canvas.into_image();
        let px = image.pixel(3, 3).unwrap();
        assert!(px[0] > 120 && px[0] < 135);
        assert_eq!(image.pixel(2, 2), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_draw_scales_into_destination() {
        let mut canvas = Canvas::new(Size::new(8, 8), [0, 0, 0, 255]);
        canvas.draw(&Image::solid(Size::new(2, 2), [0, 0, 255, 255]), Rect::new(0, 0, 8, 8));
        let image = canvas.into_image();
        assert_eq!(image.pixel(7, 7), Some([0, 0, 255, 255]));
        assert_eq!(image.pixel(0, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_png_roundtrip_preserves_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), 1, 1);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[200, 10, 20]).unwrap();
        }
        let image = Image::load_png(&path).unwrap();
        assert_eq!(image.pixel(0, 0), Some([20, 10, 200, 255]));
    }
}
