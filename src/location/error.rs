//! Location acquisition failures.
//!
//! Every terminal failure carries the device family it happened on, so the
//! caller can show device-specific remediation text next to the short message.

use thiserror::Error;

use super::device::DeviceFamily;
use super::sensor::SensorError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    /// The user or the platform refused location access. Never retried.
    #[error("location permission denied on {family}")]
    PermissionDenied { family: DeviceFamily },

    #[error("position unavailable after {attempts} attempt(s)")]
    PositionUnavailable { family: DeviceFamily, attempts: u32 },

    #[error("timed out waiting for a position after {attempts} attempt(s)")]
    Timeout { family: DeviceFamily, attempts: u32 },

    /// The device has no position sensor. No read was attempted.
    #[error("location is not supported on {family}")]
    Unsupported { family: DeviceFamily },

    /// A conforming sensor never produces this; the acquirer logs it and
    /// treats it as [`LocationError::PositionUnavailable`].
    #[error("sensor reported out-of-range coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

impl LocationError {
    pub(crate) fn from_sensor(error: SensorError, family: DeviceFamily, attempts: u32) -> Self {
        match error {
            SensorError::PermissionDenied => LocationError::PermissionDenied { family },
            SensorError::Timeout => LocationError::Timeout { family, attempts },
            SensorError::Unavailable | SensorError::Unknown => {
                LocationError::PositionUnavailable { family, attempts }
            }
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocationError::PositionUnavailable { .. }
                | LocationError::Timeout { .. }
                | LocationError::InvalidCoordinates { .. }
        )
    }

    /// Stamp the attempt count onto a retryable failure.
    pub(crate) fn after_attempts(self, attempts: u32) -> Self {
        match self {
            LocationError::PositionUnavailable { family, .. } => {
                LocationError::PositionUnavailable { family, attempts }
            }
            LocationError::Timeout { family, .. } => LocationError::Timeout { family, attempts },
            other => other,
        }
    }

    /// Short message suitable for a toast or status line.
    pub fn user_message(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied { .. } => "Location access was denied.",
            LocationError::PositionUnavailable { .. } | LocationError::InvalidCoordinates { .. } => {
                "Your location could not be determined."
            }
            LocationError::Timeout { .. } => "Getting your location took too long.",
            LocationError::Unsupported { .. } => "This device cannot report its location.",
        }
    }

    /// Longer, device-specific instructions for getting past the failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied { family } => match family {
                DeviceFamily::IosSafari => {
                    "Open Settings > Privacy & Security > Location Services, turn it on, \
                     set Safari Websites to \"While Using the App\", then reload the page."
                }
                DeviceFamily::IosChrome => {
                    "Open Settings > Privacy & Security > Location Services, turn it on, \
                     allow location for Chrome, then reload the page."
                }
                DeviceFamily::AndroidChrome => {
                    "Tap the lock icon in the address bar, open Permissions and allow Location. \
                     Make sure Location is switched on in the quick settings."
                }
                DeviceFamily::SamsungInternet => {
                    "Open Samsung Internet settings > Sites and downloads > Site permissions > \
                     Location and allow this site. Switch on Location in the quick settings."
                }
                DeviceFamily::Firefox => {
                    "Click the permissions icon left of the address bar, clear the blocked \
                     location permission and reload the page."
                }
                _ => "Grant location permission for this site in your browser settings and reload the page.",
            },
            LocationError::PositionUnavailable { family, .. } if is_handheld(*family) => {
                "Turn on GPS / Location and move to an open area with a clear view of the sky."
            }
            LocationError::PositionUnavailable { .. } | LocationError::InvalidCoordinates { .. } => {
                "Check that location services are enabled in the operating system, \
                 or connect to Wi-Fi to improve positioning."
            }
            LocationError::Timeout { .. } => {
                "The GPS signal took too long. Move outdoors or near a window and try again."
            }
            LocationError::Unsupported { .. } => {
                "This browser or device does not provide location. Use a phone or tablet with GPS."
            }
        }
    }
}

fn is_handheld(family: DeviceFamily) -> bool {
    matches!(
        family,
        DeviceFamily::IosSafari
            | DeviceFamily::IosChrome
            | DeviceFamily::AndroidChrome
            | DeviceFamily::SamsungInternet
    )
}
