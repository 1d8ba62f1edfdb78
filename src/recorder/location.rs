//! Capture location metadata

use serde::{Deserialize, Serialize};

/// A position in WGS 84 degrees, altitude in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// ISO 6709 string, e.g. `+37.3349-122.0090+012.500/`
    pub fn iso6709(&self) -> String {
        let mut out = format!("{:+08.4}{:+09.4}", self.latitude, self.longitude);
        if let Some(altitude) = self.altitude {
            out.push_str(&format!("{altitude:+08.3}"));
        }
        out.push('/');
        out
    }
}

/// Supplies the device location when a take starts writing
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<GeoLocation>;
}

/// A location that never changes
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub GeoLocation);

impl LocationProvider for FixedLocation {
    fn current_location(&self) -> Option<GeoLocation> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso6709_without_altitude() {
        let location = GeoLocation::new(37.33492, -122.00902);
        assert_eq!(location.iso6709(), "+37.3349-122.0090/");
    }

    #[test]
    fn test_iso6709_pads_small_values() {
        let location = GeoLocation::new(-7.5, 2.35).with_altitude(12.5);
        assert_eq!(location.iso6709(), "-07.5000+002.3500+012.500/");
    }
}
