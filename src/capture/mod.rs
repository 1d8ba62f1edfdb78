//! Camera capture
//!
//! Device discovery and negotiation, sample delivery, audio metering and
//! orientation handling. Hardware access sits behind the traits in
//! [`traits`] and [`source`]; [`synthetic`] provides a software camera.

pub mod error;
pub mod metering;
pub mod negotiator;
pub mod orientation;
pub mod profile;
pub mod source;
pub mod synthetic;
pub mod traits;

pub use error::{CaptureError, CaptureResult};
pub use metering::{AudioLevelMeter, ChannelLevel, LevelReading, MeteredSink};
pub use negotiator::{DeviceNegotiator, FallbackTier, NegotiatedDevice};
pub use orientation::{
    DeviceOrientation, Orientation, OrientationContext, OrientationTracker, Rotation, Transform,
};
pub use profile::{CaptureProfile, CodecPreference, FrameRate, ProfilePresets, StorageTarget};
pub use source::{
    DropReason, DroppedFrame, FanOutSink, SampleSink, SampleSource, SourceProvider,
};
pub use synthetic::{SyntheticBackend, SyntheticSource};
pub use traits::{
    CameraPosition, ColorSpace, DeviceCandidate, DeviceConfiguration, DeviceControl,
    DeviceDiscovery, DeviceFormat, Resolution,
};
