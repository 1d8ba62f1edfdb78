//! Orientation and transform resolution
//!
//! Maps the sensor orientation of the active track, the interface
//! orientation and the camera facing to one of four rotations plus a
//! mirroring flag. Front cameras mirror, which swaps the left/right
//! relationship between sensor and interface.

use super::traits::CameraPosition;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Quantized orientation of a sensor connection or the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Portrait,
        Orientation::PortraitUpsideDown,
        Orientation::LandscapeLeft,
        Orientation::LandscapeRight,
    ];

    fn index(self) -> usize {
        match self {
            Orientation::Portrait => 0,
            Orientation::PortraitUpsideDown => 1,
            Orientation::LandscapeLeft => 2,
            Orientation::LandscapeRight => 3,
        }
    }

    /// Clockwise angle from portrait
    pub fn degrees(self) -> u16 {
        match self {
            Orientation::Portrait => 0,
            Orientation::LandscapeRight => 90,
            Orientation::PortraitUpsideDown => 180,
            Orientation::LandscapeLeft => 270,
        }
    }

    pub fn is_landscape(self) -> bool {
        matches!(self, Orientation::LandscapeLeft | Orientation::LandscapeRight)
    }

    /// Native orientation of a camera's sensor connection
    pub fn native_sensor(position: CameraPosition) -> Orientation {
        match position {
            CameraPosition::Front => Orientation::LandscapeLeft,
            CameraPosition::Back | CameraPosition::External => Orientation::LandscapeRight,
        }
    }
}

/// Physical orientation reported by the motion sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrientation {
    Unknown,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
}

impl DeviceOrientation {
    /// Interface orientation matching this physical orientation.
    ///
    /// Device landscape-left (home side right) corresponds to interface
    /// landscape-right and vice versa. Flat and unknown have no match.
    pub fn as_interface(self) -> Option<Orientation> {
        match self {
            DeviceOrientation::Portrait => Some(Orientation::Portrait),
            DeviceOrientation::PortraitUpsideDown => Some(Orientation::PortraitUpsideDown),
            DeviceOrientation::LandscapeLeft => Some(Orientation::LandscapeRight),
            DeviceOrientation::LandscapeRight => Some(Orientation::LandscapeLeft),
            DeviceOrientation::Unknown | DeviceOrientation::FaceUp | DeviceOrientation::FaceDown => None,
        }
    }
}

/// One of four 90° rotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Rotation for an angle, normalized to [0, 360) and snapped to 90°
    pub fn from_degrees(degrees: i32) -> Rotation {
        match (degrees.rem_euclid(360) + 45) / 90 % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    /// Whether width and height trade places
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Rotation plus mirroring applied to a track or preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub rotation: Rotation,
    pub mirrored: bool,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rotation: Rotation::Deg0,
        mirrored: false,
    };
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

use Rotation::{Deg0, Deg180, Deg270, Deg90};

// Rows: sensor (Portrait, PortraitUpsideDown, LandscapeLeft, LandscapeRight)
// Columns: interface, same order
const BACK_TABLE: [[Rotation; 4]; 4] = [
    [Deg0, Deg180, Deg270, Deg90],
    [Deg180, Deg0, Deg90, Deg270],
    [Deg90, Deg270, Deg0, Deg180],
    [Deg270, Deg90, Deg180, Deg0],
];

const FRONT_TABLE: [[Rotation; 4]; 4] = [
    [Deg0, Deg180, Deg90, Deg270],
    [Deg180, Deg0, Deg270, Deg90],
    [Deg270, Deg90, Deg0, Deg180],
    [Deg90, Deg270, Deg180, Deg0],
];

/// Resolve the transform for a sensor/interface/facing combination
pub fn resolve_transform(
    sensor: Orientation,
    interface: Orientation,
    position: CameraPosition,
) -> Transform {
    match position {
        CameraPosition::Front => Transform {
            rotation: FRONT_TABLE[sensor.index()][interface.index()],
            mirrored: true,
        },
        CameraPosition::Back | CameraPosition::External => Transform {
            rotation: BACK_TABLE[sensor.index()][interface.index()],
            mirrored: false,
        },
    }
}

/// Everything needed to resolve a transform at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationContext {
    pub device: DeviceOrientation,
    pub interface: Orientation,
    pub position: CameraPosition,
    pub sensor: Orientation,
}

impl OrientationContext {
    pub fn new(position: CameraPosition) -> Self {
        Self {
            device: DeviceOrientation::Unknown,
            interface: Orientation::LandscapeRight,
            position,
            sensor: Orientation::native_sensor(position),
        }
    }

    /// Transform for the on-screen preview (follows the interface)
    pub fn preview_transform(&self) -> Transform {
        resolve_transform(self.sensor, self.interface, self.position)
    }

    /// Transform baked into a recording (follows how the device is held,
    /// falling back to the interface when the device is flat or unknown)
    pub fn recording_transform(&self) -> Transform {
        let basis = self.device.as_interface().unwrap_or(self.interface);
        resolve_transform(self.sensor, basis, self.position)
    }
}

/// Shared, updatable orientation state
///
/// UI rotation events update the tracker; the recorder snapshots it once
/// per session.
#[derive(Clone)]
pub struct OrientationTracker {
    context: Arc<RwLock<OrientationContext>>,
    preview_tx: Arc<watch::Sender<Transform>>,
}

impl OrientationTracker {
    pub fn new(context: OrientationContext) -> Self {
        let (preview_tx, _) = watch::channel(context.preview_transform());
        Self {
            context: Arc::new(RwLock::new(context)),
            preview_tx: Arc::new(preview_tx),
        }
    }

    /// Current context
    pub fn snapshot(&self) -> OrientationContext {
        *self.context.read()
    }

    /// Preview transform updates
    pub fn preview(&self) -> watch::Receiver<Transform> {
        self.preview_tx.subscribe()
    }

    pub fn set_interface(&self, interface: Orientation) {
        self.update(|c| c.interface = interface);
    }

    pub fn set_device(&self, device: DeviceOrientation) {
        self.update(|c| c.device = device);
    }

    /// Switch cameras; the sensor orientation follows the new camera
    pub fn set_position(&self, position: CameraPosition) {
        self.update(|c| {
            c.position = position;
            c.sensor = Orientation::native_sensor(position);
        });
    }

    fn update(&self, apply: impl FnOnce(&mut OrientationContext)) {
        let transform = {
            let mut context = self.context.write();
            apply(&mut context);
            context.preview_transform()
        };
        self.preview_tx.send_replace(transform);
    }
}

impl Default for OrientationTracker {
    fn default() -> Self {
        Self::new(OrientationContext::new(CameraPosition::Back))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_complete_and_consistent() {
        for position in [CameraPosition::Back, CameraPosition::Front] {
            for sensor in Orientation::ALL {
                for interface in Orientation::ALL {
                    let transform = resolve_transform(sensor, interface, position);
                    let expected = match position {
                        CameraPosition::Front => {
                            sensor.degrees() as i32 - interface.degrees() as i32
                        }
                        _ => interface.degrees() as i32 - sensor.degrees() as i32,
                    };
                    assert_eq!(
                        transform.rotation,
                        Rotation::from_degrees(expected),
                        "{position:?} sensor={sensor:?} interface={interface:?}"
                    );
                    assert_eq!(transform.mirrored, position == CameraPosition::Front);
                }
            }
        }
    }

    #[test]
    fn test_matching_orientation_is_identity() {
        for sensor in Orientation::ALL {
            assert_eq!(
                resolve_transform(sensor, sensor, CameraPosition::Back).rotation,
                Rotation::Deg0
            );
        }
    }

    #[test]
    fn test_portrait_phone_rotates_both_cameras_alike() {
        let back = OrientationContext {
            interface: Orientation::Portrait,
            ..OrientationContext::new(CameraPosition::Back)
        };
        let front = OrientationContext {
            interface: Orientation::Portrait,
            ..OrientationContext::new(CameraPosition::Front)
        };
        assert_eq!(back.preview_transform().rotation, Rotation::Deg270);
        assert_eq!(front.preview_transform().rotation, Rotation::Deg270);
        assert!(front.preview_transform().mirrored);
    }

    #[test]
    fn test_recording_follows_device_when_known() {
        let mut context = OrientationContext::new(CameraPosition::Back);
        context.interface = Orientation::Portrait;
        context.device = DeviceOrientation::LandscapeLeft;
        assert_eq!(context.recording_transform().rotation, Rotation::Deg0);

        context.device = DeviceOrientation::FaceUp;
        assert_eq!(context.recording_transform(), context.preview_transform());
    }

    #[test]
    fn test_from_degrees_normalizes() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(450), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-180), Rotation::Deg180);
    }

    #[test]
    fn test_tracker_publishes_preview_changes() {
        let tracker = OrientationTracker::default();
        let rx = tracker.preview();
        tracker.set_interface(Orientation::Portrait);
        assert_eq!(rx.borrow().rotation, Rotation::Deg270);

        tracker.set_position(CameraPosition::Front);
        assert!(rx.borrow().mirrored);
        assert_eq!(tracker.snapshot().sensor, Orientation::LandscapeLeft);
    }
}
