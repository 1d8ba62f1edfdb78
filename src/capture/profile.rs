//! Capture profiles
//!
//! A `CaptureProfile` describes what a recording session asks of the camera.
//! It is selected once when a session starts and does not change while the
//! session is live.

use super::traits::{CameraPosition, ColorSpace, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the preset every install must ship
pub const DEFAULT_PRESET: &str = "1080p30";

/// Supported capture frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameRate {
    Fps24,
    Fps25,
    Fps30,
}

impl FrameRate {
    pub fn fps(&self) -> u32 {
        match self {
            FrameRate::Fps24 => 24,
            FrameRate::Fps25 => 25,
            FrameRate::Fps30 => 30,
        }
    }

    /// Duration of one frame in seconds
    pub fn frame_seconds(&self) -> f64 {
        1.0 / self.fps() as f64
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            24 => Ok(FrameRate::Fps24),
            25 => Ok(FrameRate::Fps25),
            30 => Ok(FrameRate::Fps30),
            other => Err(format!("Unsupported frame rate: {other} (expected 24, 25 or 30)")),
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> u32 {
        rate.fps()
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}fps", self.fps())
    }
}

/// Preferred output codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecPreference {
    /// Pick from the color space
    Automatic,
    ProRes,
    Hevc,
    H264,
}

/// Where finished takes are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTarget {
    Internal,
    External,
}

/// What a recording session requests from the camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureProfile {
    /// Preset name this profile came from
    pub name: String,

    /// Which camera to use
    pub position: CameraPosition,

    /// Exact pixel resolution
    pub resolution: Resolution,

    /// Capture frame rate
    pub frame_rate: FrameRate,

    /// Requested color space class
    pub color_space: ColorSpace,

    /// Output codec preference
    pub codec: CodecPreference,

    /// Destination storage
    pub storage: StorageTarget,

    /// Whether to record an audio track
    pub record_audio: bool,

    /// Keep every input channel instead of mixing to stereo
    pub multitrack_audio: bool,
}

impl CaptureProfile {
    pub fn new(name: impl Into<String>, resolution: Resolution, frame_rate: FrameRate) -> Self {
        Self {
            name: name.into(),
            position: CameraPosition::Back,
            resolution,
            frame_rate,
            color_space: ColorSpace::Standard,
            codec: CodecPreference::Automatic,
            storage: StorageTarget::Internal,
            record_audio: true,
            multitrack_audio: false,
        }
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn with_position(mut self, position: CameraPosition) -> Self {
        self.position = position;
        self
    }

    pub fn with_codec(mut self, codec: CodecPreference) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_audio(mut self, record_audio: bool) -> Self {
        self.record_audio = record_audio;
        self
    }

    /// Same profile with the color space relaxed to standard
    pub fn relaxed(&self) -> Self {
        self.clone().with_color_space(ColorSpace::Standard)
    }
}

/// Named capture presets
#[derive(Debug, Clone)]
pub struct ProfilePresets {
    presets: BTreeMap<String, CaptureProfile>,
}

impl ProfilePresets {
    /// Presets shipped with the app
    pub fn builtin() -> Self {
        let mut presets = BTreeMap::new();
        for (resolution, label) in [(Resolution::HD_1080, "1080p"), (Resolution::UHD_4K, "4k")] {
            for rate in [FrameRate::Fps24, FrameRate::Fps25, FrameRate::Fps30] {
                let name = format!("{label}{}", rate.fps());
                presets.insert(name.clone(), CaptureProfile::new(name, resolution, rate));

                let log_name = format!("{label}{}-log", rate.fps());
                presets.insert(
                    log_name.clone(),
                    CaptureProfile::new(log_name, resolution, rate)
                        .with_color_space(ColorSpace::ExtendedLog),
                );
            }
        }
        Self { presets }
    }

    /// Presets from an explicit list
    pub fn from_profiles(profiles: impl IntoIterator<Item = CaptureProfile>) -> Self {
        Self {
            presets: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CaptureProfile> {
        self.presets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Look up a preset, falling back to the default preset.
    ///
    /// # Panics
    ///
    /// Panics if the default preset is missing. A correctly provisioned
    /// install always ships it.
    pub fn resolve(&self, name: &str) -> CaptureProfile {
        if let Some(profile) = self.presets.get(name) {
            return profile.clone();
        }
        tracing::warn!("Unknown capture preset '{}', using '{}'", name, DEFAULT_PRESET);
        match self.presets.get(DEFAULT_PRESET) {
            Some(profile) => profile.clone(),
            None => panic!("default capture preset '{DEFAULT_PRESET}' is not installed"),
        }
    }
}

impl Default for ProfilePresets {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(FrameRate::try_from(25).unwrap(), FrameRate::Fps25);
        assert!(FrameRate::try_from(60).is_err());
        let json = serde_json::to_string(&FrameRate::Fps24).unwrap();
        assert_eq!(json, "24");
    }

    #[test]
    fn test_builtin_presets_include_default_and_log() {
        let presets = ProfilePresets::builtin();
        assert!(presets.get(DEFAULT_PRESET).is_some());
        let log = presets.get("4k30-log").unwrap();
        assert_eq!(log.color_space, ColorSpace::ExtendedLog);
        assert_eq!(log.resolution, Resolution::UHD_4K);
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_default() {
        let presets = ProfilePresets::builtin();
        let profile = presets.resolve("8k120");
        assert_eq!(profile.name, DEFAULT_PRESET);
    }

    #[test]
    #[should_panic(expected = "default capture preset")]
    fn test_resolve_without_default_terminates() {
        let presets = ProfilePresets::from_profiles(vec![CaptureProfile::new(
            "720p24",
            Resolution::new(1280, 720),
            FrameRate::Fps24,
        )]);
        presets.resolve("missing");
    }
}
