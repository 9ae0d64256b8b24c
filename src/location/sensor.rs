//! The device position sensor seam.
//!
//! [`PositionSensor`] is what the acquirer talks to; [`PermissionQuery`] is the
//! optional platform permission API. [`ReplaySensor`] implements both from a
//! scripted list of [`ReplayStep`]s so the whole pipeline can run without real
//! hardware (the CLI feeds it from `--fix` or a JSON fixes file).

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Options passed to a single sensor read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest platform-cached fix the sensor may hand back.
    pub maximum_age: Duration,
}

/// Failure reported by the sensor for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("timed out")]
    Timeout,
    #[error("unknown sensor error")]
    Unknown,
}

/// An unvalidated reading as the sensor reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters.
    pub accuracy: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub altitude_accuracy: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

impl RawReading {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            altitude_accuracy: None,
            heading: None,
            speed: None,
        }
    }
}

/// The device's position sensor.
#[allow(async_fn_in_trait)]
pub trait PositionSensor {
    /// `false` when the device has no location capability at all.
    fn is_supported(&self) -> bool {
        true
    }

    async fn get_position(&self, options: &SensorOptions) -> Result<RawReading, SensorError>;
}

/// Current geolocation permission grant, as far as the platform will tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
    Unknown,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Prompt => write!(f, "prompt"),
            PermissionState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Platform permission-query capability.
#[allow(async_fn_in_trait)]
pub trait PermissionQuery {
    /// `None` when the platform cannot be queried.
    async fn query_geolocation_grant(&self) -> Option<PermissionState>;
}

/// One scripted sensor response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayStep {
    Fix {
        reading: RawReading,
        #[serde(default)]
        delay_ms: u64,
    },
    Error {
        error: SensorError,
        #[serde(default)]
        delay_ms: u64,
    },
}

impl ReplayStep {
    pub fn fix(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        ReplayStep::Fix {
            reading: RawReading::new(latitude, longitude, accuracy),
            delay_ms: 0,
        }
    }

    pub fn error(error: SensorError) -> Self {
        ReplayStep::Error { error, delay_ms: 0 }
    }

    /// Make the sensor take `ms` before answering.
    #[must_use]
    pub fn delayed(mut self, ms: u64) -> Self {
        match &mut self {
            ReplayStep::Fix { delay_ms, .. } | ReplayStep::Error { delay_ms, .. } => *delay_ms = ms,
        }
        self
    }

    fn delay(&self) -> Duration {
        match self {
            ReplayStep::Fix { delay_ms, .. } | ReplayStep::Error { delay_ms, .. } => {
                Duration::from_millis(*delay_ms)
            }
        }
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    steps: VecDeque<ReplayStep>,
    calls: Vec<SensorOptions>,
    in_flight: usize,
    max_in_flight: usize,
}

/// A sensor that answers from a script.
///
/// Steps are consumed in order. Once the script runs out the sensor keeps
/// repeating the last step when `repeat_last` is set, otherwise it reports
/// [`SensorError::Unavailable`].
#[derive(Debug)]
pub struct ReplaySensor {
    state: Mutex<ReplayState>,
    last: Mutex<Option<ReplayStep>>,
    repeat_last: bool,
    supported: bool,
    permission: Option<PermissionState>,
}

impl ReplaySensor {
    pub fn new(steps: impl IntoIterator<Item = ReplayStep>) -> Self {
        Self {
            state: Mutex::new(ReplayState {
                steps: steps.into_iter().collect(),
                ..ReplayState::default()
            }),
            last: Mutex::new(None),
            repeat_last: false,
            supported: true,
            permission: None,
        }
    }

    /// A sensor that always reports the same fix.
    pub fn fixed(reading: RawReading) -> Self {
        let mut sensor = Self::new([ReplayStep::Fix {
            reading,
            delay_ms: 0,
        }]);
        sensor.repeat_last = true;
        sensor
    }

    /// A device without any location capability.
    pub fn unsupported() -> Self {
        let mut sensor = Self::new(std::iter::empty());
        sensor.supported = false;
        sensor
    }

    /// Load a JSON array of steps.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let steps: Vec<ReplayStep> = serde_json::from_str(&contents)?;
        Ok(Self::new(steps))
    }

    #[must_use]
    pub fn repeating_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Answer permission queries with `state`.
    #[must_use]
    pub fn with_permission(mut self, state: PermissionState) -> Self {
        self.permission = Some(state);
        self
    }

    /// Number of reads issued so far.
    pub fn calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Options of every read, in order.
    pub fn options_seen(&self) -> Vec<SensorOptions> {
        self.lock().calls.clone()
    }

    /// Highest number of reads that were ever outstanding at once.
    pub fn max_concurrent_reads(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_step(&self, options: &SensorOptions) -> Option<ReplayStep> {
        let mut state = self.lock();
        state.calls.push(*options);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        let step = state.steps.pop_front();
        drop(state);

        let mut last = self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match step {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None if self.repeat_last => last.clone(),
            None => None,
        }
    }
}

impl PositionSensor for ReplaySensor {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn get_position(&self, options: &SensorOptions) -> Result<RawReading, SensorError> {
        let step = self.next_step(options);
        if let Some(step) = &step {
            tokio::time::sleep(step.delay()).await;
        }
        self.lock().in_flight -= 1;

        match step {
            Some(ReplayStep::Fix { reading, .. }) => Ok(reading),
            Some(ReplayStep::Error { error, .. }) => Err(error),
            None => Err(SensorError::Unavailable),
        }
    }
}

impl PermissionQuery for ReplaySensor {
    async fn query_geolocation_grant(&self) -> Option<PermissionState> {
        self.permission
    }
}
