//! Output container settings
//!
//! Chooses codec and track parameters for a take from its capture profile.

use crate::capture::{CaptureProfile, CodecPreference, ColorSpace, Transform};
use crate::media::VideoFormat;
use serde::{Deserialize, Serialize};

/// Sample rate of the recorded audio track
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Default AAC bitrate in kbps
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 192;

/// Video codec written to the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoCodec {
    /// ProRes 422 HQ, intraframe 10-bit
    ProRes422Hq,
    /// HEVC, interframe
    Hevc,
    /// H.264, interframe
    H264,
}

impl VideoCodec {
    /// Encoder arguments for ffmpeg
    pub fn ffmpeg_args(&self, frame_rate: u32, bitrate_kbps: Option<u32>) -> Vec<String> {
        let mut args: Vec<String> = match self {
            VideoCodec::ProRes422Hq => vec![
                "-c:v", "prores_ks", "-profile:v", "3", "-vendor", "apl0", "-pix_fmt",
                "yuv422p10le",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            VideoCodec::Hevc => vec![
                "-c:v", "libx265", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-tag:v", "hvc1",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            VideoCodec::H264 => vec!["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"]
                .into_iter()
                .map(String::from)
                .collect(),
        };

        if !self.is_intraframe() {
            // GOP size = 2 seconds
            args.extend(["-g".to_string(), (frame_rate * 2).to_string()]);
            match bitrate_kbps {
                Some(kbps) => args.extend(["-b:v".to_string(), format!("{kbps}k")]),
                None => args.extend(["-crf".to_string(), "18".to_string()]),
            }
        }
        args
    }

    /// Every frame is a key frame
    pub fn is_intraframe(&self) -> bool {
        matches!(self, VideoCodec::ProRes422Hq)
    }
}

/// How source audio channels map onto the audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelLayout {
    /// Mono is up-mixed, multichannel is down-mixed to two channels
    Stereo,
    /// Keep the source channel count
    Preserve,
}

/// Video track input parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrackSettings {
    pub codec: VideoCodec,
    /// Geometry and pixel layout of appended frames
    pub input: VideoFormat,
    pub frame_rate: u32,
    /// Baked into the track at session start
    pub transform: Transform,
    /// Target bitrate for interframe codecs, `None` for constant quality
    pub bitrate_kbps: Option<u32>,
}

/// Audio track input parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackSettings {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub bitrate_kbps: u32,
}

/// Everything a writer needs to create its tracks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    pub video: VideoTrackSettings,
    pub audio: Option<AudioTrackSettings>,
}

impl OutputSettings {
    /// Recommended settings for a take captured with `profile`
    ///
    /// Extended color space always records ProRes, since the interframe
    /// encoders would discard the log curve's extra precision.
    pub fn recommended(profile: &CaptureProfile, video: VideoFormat, transform: Transform) -> Self {
        let codec = match (profile.color_space, profile.codec) {
            (ColorSpace::ExtendedLog, _) | (_, CodecPreference::ProRes) => VideoCodec::ProRes422Hq,
            (_, CodecPreference::H264) => VideoCodec::H264,
            (_, CodecPreference::Hevc) | (_, CodecPreference::Automatic) => VideoCodec::Hevc,
        };

        let audio = profile.record_audio.then(|| AudioTrackSettings {
            sample_rate: OUTPUT_SAMPLE_RATE,
            layout: if profile.multitrack_audio {
                ChannelLayout::Preserve
            } else {
                ChannelLayout::Stereo
            },
            bitrate_kbps: DEFAULT_AUDIO_BITRATE_KBPS,
        });

        Self {
            video: VideoTrackSettings {
                codec,
                input: video,
                frame_rate: profile.frame_rate.fps(),
                transform,
                bitrate_kbps: None,
            },
            audio,
        }
    }

    pub fn with_audio_bitrate(mut self, kbps: u32) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.bitrate_kbps = kbps;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameRate, Resolution};
    use crate::media::PixelFormat;

    fn video() -> VideoFormat {
        VideoFormat::new(1920, 1080, PixelFormat::Bgra8)
    }

    #[test]
    fn test_extended_color_space_records_prores() {
        let profile = CaptureProfile::new("log", Resolution::HD_1080, FrameRate::Fps24)
            .with_color_space(ColorSpace::ExtendedLog)
            .with_codec(CodecPreference::H264);
        let settings = OutputSettings::recommended(&profile, video(), Transform::IDENTITY);
        assert_eq!(settings.video.codec, VideoCodec::ProRes422Hq);
        assert_eq!(settings.video.frame_rate, 24);
    }

    #[test]
    fn test_standard_automatic_records_hevc() {
        let profile = CaptureProfile::new("std", Resolution::HD_1080, FrameRate::Fps30);
        let settings = OutputSettings::recommended(&profile, video(), Transform::IDENTITY);
        assert_eq!(settings.video.codec, VideoCodec::Hevc);

        let audio = settings.audio.unwrap();
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.layout, ChannelLayout::Stereo);
    }

    #[test]
    fn test_no_audio_track_when_disabled() {
        let profile = CaptureProfile::new("std", Resolution::HD_1080, FrameRate::Fps30)
            .with_codec(CodecPreference::H264)
            .with_audio(false);
        let settings = OutputSettings::recommended(&profile, video(), Transform::IDENTITY);
        assert_eq!(settings.video.codec, VideoCodec::H264);
        assert!(settings.audio.is_none());
    }

    #[test]
    fn test_interframe_args_carry_gop() {
        let args = VideoCodec::H264.ffmpeg_args(30, Some(6000));
        assert!(args.windows(2).any(|w| w[0] == "-g" && w[1] == "60"));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "6000k"));
        assert!(!VideoCodec::ProRes422Hq
            .ffmpeg_args(30, None)
            .contains(&"-g".to_string()));
    }
}
