//! Counter-driven frame timestamps
//!
//! Composite frames are stamped `origin + n / fps` regardless of how long
//! composition took, so spacing is exactly one frame period.

use crate::capture::FrameRate;
use crate::media::MediaTime;

#[derive(Debug, Clone)]
pub struct FrameClock {
    fps: i32,
    origin_ticks: i64,
    frame: i64,
}

impl FrameClock {
    /// Clock starting at zero
    pub fn new(frame_rate: FrameRate) -> Self {
        Self::starting_at(frame_rate, MediaTime::ZERO)
    }

    /// Clock whose first frame is at `origin`, rounded to a frame boundary
    pub fn starting_at(frame_rate: FrameRate, origin: MediaTime) -> Self {
        let fps = frame_rate.fps() as i32;
        Self {
            fps,
            origin_ticks: origin.convert_scale(fps).value,
            frame: 0,
        }
    }

    /// Timestamp for the next frame
    pub fn next(&mut self) -> MediaTime {
        let pts = MediaTime::new(self.origin_ticks + self.frame, self.fps);
        self.frame += 1;
        pts
    }

    /// Frames stamped so far
    pub fn frames(&self) -> u64 {
        self.frame as u64
    }

    pub fn fps(&self) -> u32 {
        self.fps as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_spacing() {
        let mut clock = FrameClock::new(FrameRate::Fps25);
        let stamps: Vec<_> = (0..4).map(|_| clock.next()).collect();
        assert_eq!(stamps[0], MediaTime::ZERO);
        assert_eq!(stamps[3], MediaTime::new(3, 25));
        for pair in stamps.windows(2) {
            assert!((pair[1].seconds_since(pair[0]) - 0.04).abs() < 1e-12);
        }
        assert_eq!(clock.frames(), 4);
    }

    #[test]
    fn test_origin_offsets_frames() {
        let mut clock = FrameClock::starting_at(FrameRate::Fps30, MediaTime::new(10, 1));
        assert_eq!(clock.next(), MediaTime::new(300, 30));
        assert_eq!(clock.next(), MediaTime::new(301, 30));
    }
}
