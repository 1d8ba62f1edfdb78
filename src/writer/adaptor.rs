//! Sample conversion in front of the writer inputs

use super::settings::ChannelLayout;
use super::{ContainerWriter, WriterError, WriterResult};
use crate::media::{
    AudioFormat, BufferPool, MediaSample, MediaTime, PixelFormat, PooledBuffer, VideoFormat,
};

/// Appends frames to a video input at a presentation time
///
/// Frames must match the input geometry. RGBA and BGRA are swizzled into
/// pooled buffers; any other layout change is rejected.
pub struct PixelBufferAdaptor {
    input: VideoFormat,
    pool: BufferPool,
}

impl PixelBufferAdaptor {
    pub fn new(input: VideoFormat) -> Self {
        Self {
            input,
            pool: BufferPool::new(input.frame_len(), 4),
        }
    }

    pub fn input_format(&self) -> VideoFormat {
        self.input
    }

    /// Convert a video sample into a frame for the input
    pub fn conform(&self, sample: MediaSample) -> WriterResult<(PooledBuffer, MediaTime)> {
        let Some(format) = sample.video_format() else {
            return Err(WriterError::FrameMismatch {
                expected: "video".to_string(),
                actual: "audio".to_string(),
            });
        };

        if format.width != self.input.width || format.height != self.input.height {
            return Err(WriterError::FrameMismatch {
                expected: format!("{}x{}", self.input.width, self.input.height),
                actual: format!("{}x{}", format.width, format.height),
            });
        }
        if sample.payload.len() < self.input.frame_len() {
            return Err(WriterError::FrameMismatch {
                expected: format!("{} bytes", self.input.frame_len()),
                actual: format!("{} bytes", sample.payload.len()),
            });
        }

        match (format.pixel_format, self.input.pixel_format) {
            (from, to) if from == to => Ok((sample.payload, sample.pts)),
            (PixelFormat::Rgba8, PixelFormat::Bgra8) | (PixelFormat::Bgra8, PixelFormat::Rgba8) => {
                let mut frame = self.pool.acquire();
                for (dst, src) in frame
                    .chunks_exact_mut(4)
                    .zip(sample.payload.chunks_exact(4))
                {
                    dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
                }
                Ok((frame, sample.pts))
            }
            (from, to) => Err(WriterError::FrameMismatch {
                expected: format!("{to:?}"),
                actual: format!("{from:?}"),
            }),
        }
    }

    /// Conform and append one video sample
    pub fn append(&self, writer: &mut dyn ContainerWriter, sample: MediaSample) -> WriterResult<()> {
        let (frame, pts) = self.conform(sample)?;
        writer.append_video(frame, pts)
    }
}

/// Map an audio block onto the track's channel layout
pub fn conform_audio(sample: MediaSample, layout: ChannelLayout) -> MediaSample {
    let Some(format) = sample.audio_format() else {
        return sample;
    };
    if layout == ChannelLayout::Preserve || format.channels == 2 || format.channels == 0 {
        return sample;
    }

    let channels = format.channels as usize;
    let frames = sample.audio_frame_count();
    let mut stereo = Vec::with_capacity(frames * 4);
    for frame in sample.payload.chunks_exact(channels * 2) {
        let value = |i: usize| i16::from_le_bytes([frame[i * 2], frame[i * 2 + 1]]) as i32;
        let (left, right) = if channels == 1 {
            (value(0), value(0))
        } else {
            // Even channels to the left, odd to the right
            let mut sums = [0i32; 2];
            let mut counts = [0i32; 2];
            for ch in 0..channels {
                sums[ch % 2] += value(ch);
                counts[ch % 2] += 1;
            }
            (sums[0] / counts[0].max(1), sums[1] / counts[1].max(1))
        };
        stereo.extend_from_slice(&(left as i16).to_le_bytes());
        stereo.extend_from_slice(&(right as i16).to_le_bytes());
    }

    MediaSample::audio(
        sample.pts,
        PooledBuffer::detached(stereo),
        AudioFormat::new(format.sample_rate, 2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, pixel_format: PixelFormat, fill: [u8; 4]) -> MediaSample {
        let format = VideoFormat::new(width, height, pixel_format);
        let data: Vec<u8> = fill.iter().copied().cycle().take(format.frame_len()).collect();
        MediaSample::video(MediaTime::new(1, 30), PooledBuffer::detached(data), format)
    }

    #[test]
    fn test_matching_frame_passes_through() {
        let adaptor = PixelBufferAdaptor::new(VideoFormat::new(4, 2, PixelFormat::Bgra8));
        let (out, pts) = adaptor
            .conform(frame(4, 2, PixelFormat::Bgra8, [1, 2, 3, 4]))
            .unwrap();
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(pts, MediaTime::new(1, 30));
    }

    #[test]
    fn test_rgba_is_swizzled_to_bgra() {
        let adaptor = PixelBufferAdaptor::new(VideoFormat::new(4, 2, PixelFormat::Bgra8));
        let (out, _) = adaptor
            .conform(frame(4, 2, PixelFormat::Rgba8, [10, 20, 30, 255]))
            .unwrap();
        assert!(out.chunks_exact(4).all(|px| px == [30, 20, 10, 255]));
    }

    #[test]
    fn test_geometry_mismatch_is_rejected() {
        let adaptor = PixelBufferAdaptor::new(VideoFormat::new(4, 2, PixelFormat::Bgra8));
        let err = adaptor
            .conform(frame(8, 2, PixelFormat::Bgra8, [0; 4]))
            .unwrap_err();
        assert!(matches!(err, WriterError::FrameMismatch { .. }));

        let err = adaptor
            .conform(frame(4, 2, PixelFormat::Nv12, [0; 4]))
            .unwrap_err();
        assert!(matches!(err, WriterError::FrameMismatch { .. }));
    }

    #[test]
    fn test_mono_is_upmixed_to_stereo() {
        let pcm: Vec<u8> = [100i16, -200, 300]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mono = MediaSample::audio(
            MediaTime::ZERO,
            PooledBuffer::detached(pcm),
            AudioFormat::new(48_000, 1),
        );
        let stereo = conform_audio(mono, ChannelLayout::Stereo);
        assert_eq!(stereo.audio_format(), Some(AudioFormat::new(48_000, 2)));
        assert_eq!(stereo.audio_frame_count(), 3);
        let values: Vec<i16> = stereo
            .payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![100, 100, -200, -200, 300, 300]);
    }

    #[test]
    fn test_preserve_keeps_channels() {
        let quad = MediaSample::audio(
            MediaTime::ZERO,
            PooledBuffer::detached(vec![0; 16]),
            AudioFormat::new(48_000, 4),
        );
        let out = conform_audio(quad, ChannelLayout::Preserve);
        assert_eq!(out.audio_format().unwrap().channels, 4);
    }
}
