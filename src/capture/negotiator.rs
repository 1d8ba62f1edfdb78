//! Device negotiation
//!
//! Picks a camera and format for a `CaptureProfile` and applies it. The
//! search runs in tiers and never skips one:
//!
//! 1. exact resolution + requested color space (+ codec marker for log)
//! 2. exact resolution + standard color space
//! 3. first enumerated device, no format applied

use super::error::{CaptureError, CaptureResult};
use super::profile::CaptureProfile;
use super::traits::{
    ColorSpace, DeviceCandidate, DeviceConfiguration, DeviceControl, DeviceDiscovery, DeviceFormat,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which search tier produced the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FallbackTier {
    /// Every requested constraint satisfied
    Exact,
    /// Color space relaxed to standard
    StandardColorSpace,
    /// First device, no format guarantee
    FirstAvailable,
}

/// Result of negotiation: a device and what to apply to it
#[derive(Debug, Clone)]
pub struct NegotiatedDevice {
    pub device: DeviceCandidate,
    pub format: Option<DeviceFormat>,
    pub color_space: ColorSpace,
    pub frame_rate: u32,
    pub tier: FallbackTier,
}

impl NegotiatedDevice {
    /// The profile the session actually runs with
    pub fn effective_profile(&self, requested: &CaptureProfile) -> CaptureProfile {
        let mut profile = requested.clone().with_color_space(self.color_space);
        if let Some(format) = &self.format {
            profile.resolution = format.resolution;
        }
        profile
    }
}

/// Selects and configures capture devices
pub struct DeviceNegotiator {
    discovery: Arc<dyn DeviceDiscovery>,
    control: Arc<dyn DeviceControl>,
}

impl DeviceNegotiator {
    pub fn new(discovery: Arc<dyn DeviceDiscovery>, control: Arc<dyn DeviceControl>) -> Self {
        Self { discovery, control }
    }

    /// Select and configure a device for `profile`
    pub fn negotiate(&self, profile: &CaptureProfile) -> CaptureResult<NegotiatedDevice> {
        let negotiated = self.select(profile)?;
        self.configure(&negotiated)?;
        Ok(negotiated)
    }

    /// Choose a device and format without touching hardware state
    pub fn select(&self, profile: &CaptureProfile) -> CaptureResult<NegotiatedDevice> {
        let candidates = self.discovery.enumerate(profile.position);
        if candidates.is_empty() {
            tracing::error!("No {} camera available", profile.position);
            return Err(CaptureError::NoCameraAvailable);
        }

        let frame_rate = profile.frame_rate.fps();

        if let Some((device, format)) = find_format(&candidates, profile.resolution, profile.color_space) {
            tracing::info!(
                "Selected {} with {} {} (exact match)",
                device.name,
                format.resolution,
                profile.color_space
            );
            return Ok(NegotiatedDevice {
                device: device.clone(),
                format: Some(format.clone()),
                color_space: profile.color_space,
                frame_rate,
                tier: FallbackTier::Exact,
            });
        }

        if profile.color_space != ColorSpace::Standard {
            if let Some((device, format)) =
                find_format(&candidates, profile.resolution, ColorSpace::Standard)
            {
                tracing::warn!(
                    "No device supports {} at {}, falling back to standard color space on {}",
                    profile.color_space,
                    profile.resolution,
                    device.name
                );
                return Ok(NegotiatedDevice {
                    device: device.clone(),
                    format: Some(format.clone()),
                    color_space: ColorSpace::Standard,
                    frame_rate,
                    tier: FallbackTier::StandardColorSpace,
                });
            }
        }

        let device = &candidates[0];
        tracing::warn!(
            "No format matches {} on any {} camera, using {} without a format guarantee",
            profile.resolution,
            profile.position,
            device.name
        );
        Ok(NegotiatedDevice {
            device: device.clone(),
            format: None,
            color_space: ColorSpace::Standard,
            frame_rate,
            tier: FallbackTier::FirstAvailable,
        })
    }

    /// Apply a negotiated selection as one step: lock, set format, set color
    /// space, unlock. On failure the previous configuration is restored.
    pub fn configure(&self, negotiated: &NegotiatedDevice) -> CaptureResult<()> {
        let Some(format) = &negotiated.format else {
            tracing::debug!("{}: no format to apply", negotiated.device.id);
            return Ok(());
        };
        let device_id = negotiated.device.id.as_str();

        self.control.lock_for_configuration(device_id)?;
        let result = self.apply_locked(device_id, format, negotiated);
        self.control.unlock_for_configuration(device_id);

        match &result {
            Ok(()) => tracing::info!(
                "Configured {}: {} @ {}fps, {}",
                device_id,
                format.resolution,
                negotiated.frame_rate.min(format.max_frame_rate),
                negotiated.color_space
            ),
            Err(e) => tracing::error!("Failed to configure {}: {}", device_id, e),
        }
        result
    }

    fn apply_locked(
        &self,
        device_id: &str,
        format: &DeviceFormat,
        negotiated: &NegotiatedDevice,
    ) -> CaptureResult<()> {
        let snapshot: DeviceConfiguration = self.control.active_configuration(device_id)?;
        let frame_rate = negotiated.frame_rate.min(format.max_frame_rate);

        let applied = self
            .control
            .set_active_format(device_id, format, frame_rate)
            .and_then(|_| self.control.set_color_space(device_id, negotiated.color_space));

        if let Err(e) = applied {
            if let Err(restore_err) = self.control.restore_configuration(device_id, &snapshot) {
                tracing::error!(
                    "Could not restore configuration of {} after failure: {}",
                    device_id,
                    restore_err
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

fn find_format<'a>(
    candidates: &'a [DeviceCandidate],
    resolution: super::traits::Resolution,
    color_space: ColorSpace,
) -> Option<(&'a DeviceCandidate, &'a DeviceFormat)> {
    candidates.iter().find_map(|device| {
        device
            .formats
            .iter()
            .find(|format| {
                format.resolution == resolution
                    && format.supports_color_space(color_space)
                    && (color_space != ColorSpace::ExtendedLog || format.has_extended_marker())
            })
            .map(|format| (device, format))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::profile::FrameRate;
    use crate::capture::synthetic::{ConfigStep, SyntheticBackend};
    use crate::capture::traits::{CameraPosition, Resolution};

    fn negotiator(backend: &Arc<SyntheticBackend>) -> DeviceNegotiator {
        DeviceNegotiator::new(backend.clone(), backend.clone())
    }

    fn profile(color_space: ColorSpace) -> CaptureProfile {
        CaptureProfile::new("test", Resolution::HD_1080, FrameRate::Fps30).with_color_space(color_space)
    }

    #[test]
    fn test_exact_standard_match_selected() {
        let backend = Arc::new(SyntheticBackend::default());
        let negotiated = negotiator(&backend).negotiate(&profile(ColorSpace::Standard)).unwrap();

        assert_eq!(negotiated.tier, FallbackTier::Exact);
        let format = negotiated.format.unwrap();
        assert_eq!(format.resolution, Resolution::HD_1080);
        assert!(format.supports_color_space(ColorSpace::Standard));

        let applied = backend.active_configuration(&negotiated.device.id).unwrap();
        assert_eq!(applied.format, Some(format));
        assert_eq!(applied.frame_rate, Some(30));
    }

    #[test]
    fn test_extended_match_requires_marker() {
        let backend = Arc::new(SyntheticBackend::default());
        let negotiated = negotiator(&backend).select(&profile(ColorSpace::ExtendedLog)).unwrap();
        assert_eq!(negotiated.tier, FallbackTier::Exact);
        assert!(negotiated.format.unwrap().has_extended_marker());
    }

    #[test]
    fn test_extended_falls_back_to_standard_before_first_available() {
        let backend = Arc::new(SyntheticBackend::with_catalog(vec![
            SyntheticBackend::standard_camera("cam-a", CameraPosition::Back, &[Resolution::new(1280, 720)]),
            SyntheticBackend::standard_camera("cam-b", CameraPosition::Back, &[Resolution::HD_1080]),
        ]));
        let negotiated = negotiator(&backend).select(&profile(ColorSpace::ExtendedLog)).unwrap();

        assert_eq!(negotiated.tier, FallbackTier::StandardColorSpace);
        assert_eq!(negotiated.device.id, "cam-b");
        assert_eq!(negotiated.color_space, ColorSpace::Standard);
    }

    #[test]
    fn test_first_available_when_nothing_matches() {
        let backend = Arc::new(SyntheticBackend::with_catalog(vec![
            SyntheticBackend::standard_camera("cam-a", CameraPosition::Back, &[Resolution::new(640, 480)]),
            SyntheticBackend::standard_camera("cam-b", CameraPosition::Back, &[Resolution::new(1280, 720)]),
        ]));
        let negotiated = negotiator(&backend).negotiate(&profile(ColorSpace::ExtendedLog)).unwrap();

        assert_eq!(negotiated.tier, FallbackTier::FirstAvailable);
        assert_eq!(negotiated.device.id, "cam-a");
        assert!(negotiated.format.is_none());
    }

    #[test]
    fn test_marker_missing_is_not_an_extended_match() {
        let mut camera = SyntheticBackend::standard_camera("cam-a", CameraPosition::Back, &[Resolution::HD_1080]);
        // Claims log support but lacks the marker
        camera.formats[0].color_spaces.push(ColorSpace::ExtendedLog);
        let backend = Arc::new(SyntheticBackend::with_catalog(vec![camera]));

        let negotiated = negotiator(&backend).select(&profile(ColorSpace::ExtendedLog)).unwrap();
        assert_eq!(negotiated.tier, FallbackTier::StandardColorSpace);
    }

    #[test]
    fn test_no_camera_for_position() {
        let backend = Arc::new(SyntheticBackend::with_catalog(vec![
            SyntheticBackend::standard_camera("front", CameraPosition::Front, &[Resolution::HD_1080]),
        ]));
        let err = negotiator(&backend)
            .negotiate(&profile(ColorSpace::Standard).with_position(CameraPosition::External))
            .unwrap_err();
        assert!(matches!(err, CaptureError::NoCameraAvailable));
    }

    #[test]
    fn test_failed_color_space_restores_previous_configuration() {
        let backend = Arc::new(SyntheticBackend::default());
        backend.fail_on(ConfigStep::ColorSpace);
        let negotiator = negotiator(&backend);

        let selected = negotiator.select(&profile(ColorSpace::Standard)).unwrap();
        let before = backend.active_configuration(&selected.device.id).unwrap();

        let err = negotiator.configure(&selected).unwrap_err();
        assert!(matches!(err, CaptureError::ColorSpaceRejected { .. }));

        let after = backend.active_configuration(&selected.device.id).unwrap();
        assert_eq!(before, after);
        assert!(!backend.is_locked(&selected.device.id));
    }

    #[test]
    fn test_lock_failure_aborts_without_changes() {
        let backend = Arc::new(SyntheticBackend::default());
        backend.fail_on(ConfigStep::Lock);
        let err = negotiator(&backend).negotiate(&profile(ColorSpace::Standard)).unwrap_err();
        assert!(matches!(err, CaptureError::LockFailed { .. }));
    }
}
