use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::sensor::SensorOptions;

/// Extra time handheld hardware gets to produce a fix.
pub const MOBILE_TIMEOUT_ALLOWANCE: Duration = Duration::from_secs(10);

/// No tuned timeout ever exceeds this.
pub const TIMEOUT_CAP: Duration = Duration::from_secs(60);

/// Browser/device families with distinct geolocation behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    IosSafari,
    IosChrome,
    AndroidChrome,
    SamsungInternet,
    Firefox,
    Chrome,
    Safari,
    Edge,
    Opera,
    Unknown,
}

impl DeviceFamily {
    /// Families where the permission grant often only sticks after more than
    /// one prompt.
    pub fn needs_repeated_prompts(self) -> bool {
        matches!(
            self,
            DeviceFamily::IosSafari | DeviceFamily::IosChrome | DeviceFamily::SamsungInternet
        )
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceFamily::IosSafari => "Safari on iOS",
            DeviceFamily::IosChrome => "Chrome on iOS",
            DeviceFamily::AndroidChrome => "Chrome on Android",
            DeviceFamily::SamsungInternet => "Samsung Internet",
            DeviceFamily::Firefox => "Firefox",
            DeviceFamily::Chrome => "Chrome",
            DeviceFamily::Safari => "Safari",
            DeviceFamily::Edge => "Edge",
            DeviceFamily::Opera => "Opera",
            DeviceFamily::Unknown => "Unknown device",
        };
        write!(f, "{name}")
    }
}

/// Which tuning preset an acquisition uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// One query, accept whatever comes back.
    Fast,
    /// Escalating multi-attempt acquisition.
    Precise,
}

/// The device a position was acquired on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub family: DeviceFamily,
    pub name: String,
    pub is_mobile: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::new(DeviceFamily::Unknown, false)
    }
}

impl DeviceProfile {
    pub fn new(family: DeviceFamily, is_mobile: bool) -> Self {
        Self {
            family,
            name: family.to_string(),
            is_mobile,
        }
    }

    /// Classify a browser user-agent string.
    ///
    /// Order matters: Samsung Internet and Edge both advertise `Chrome/`, and
    /// every iOS browser advertises `Safari/`.
    pub fn detect(user_agent: &str) -> Self {
        let ua = user_agent;
        let is_ios = ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod");
        let is_android = ua.contains("Android");
        let is_mobile = is_ios || is_android || ua.contains("Mobi");

        let family = if ua.contains("SamsungBrowser") {
            DeviceFamily::SamsungInternet
        } else if is_ios && ua.contains("CriOS") {
            DeviceFamily::IosChrome
        } else if is_ios {
            DeviceFamily::IosSafari
        } else if ua.contains("Edg/") || ua.contains("EdgA/") {
            DeviceFamily::Edge
        } else if ua.contains("OPR/") {
            DeviceFamily::Opera
        } else if ua.contains("Firefox/") {
            DeviceFamily::Firefox
        } else if is_android && ua.contains("Chrome/") {
            DeviceFamily::AndroidChrome
        } else if ua.contains("Chrome/") {
            DeviceFamily::Chrome
        } else if ua.contains("Safari/") {
            DeviceFamily::Safari
        } else {
            DeviceFamily::Unknown
        };

        Self::new(family, is_mobile)
    }

    /// Device-tuned sensor options, including the mobile timeout allowance.
    pub fn options(&self, mode: AcquisitionMode) -> SensorOptions {
        self.options_capped(mode, TIMEOUT_CAP)
    }

    /// Like [`DeviceProfile::options`], but no timeout exceeds `cap`.
    pub fn options_capped(&self, mode: AcquisitionMode, cap: Duration) -> SensorOptions {
        let mut options = profile_for(self.family, mode);
        if self.is_mobile {
            options.timeout += MOBILE_TIMEOUT_ALLOWANCE;
        }
        options.timeout = options.timeout.min(cap);
        options
    }
}

/// Tuning table keyed by device family. Families without an entry use the
/// default row.
pub fn profile_for(family: DeviceFamily, mode: AcquisitionMode) -> SensorOptions {
    use AcquisitionMode::{Fast, Precise};

    // (high_accuracy, timeout secs, maximum_age secs)
    let (high_accuracy, timeout, maximum_age) = match (family, mode) {
        (DeviceFamily::IosSafari | DeviceFamily::IosChrome, Fast) => (true, 15, 60),
        (DeviceFamily::IosSafari | DeviceFamily::IosChrome, Precise) => (true, 30, 0),
        (DeviceFamily::AndroidChrome, Fast) => (true, 20, 30),
        (DeviceFamily::AndroidChrome, Precise) => (true, 30, 0),
        (DeviceFamily::SamsungInternet, Fast) => (false, 20, 60),
        (DeviceFamily::SamsungInternet, Precise) => (true, 35, 0),
        (DeviceFamily::Firefox, Fast) => (false, 15, 60),
        (DeviceFamily::Firefox, Precise) => (true, 25, 0),
        (DeviceFamily::Chrome | DeviceFamily::Safari, Fast) => (false, 10, 120),
        (DeviceFamily::Chrome | DeviceFamily::Safari, Precise) => (true, 20, 0),
        (_, Fast) => (false, 15, 60),
        (_, Precise) => (true, 25, 0),
    };

    SensorOptions {
        high_accuracy,
        timeout: Duration::from_secs(timeout),
        maximum_age: Duration::from_secs(maximum_age),
    }
}
