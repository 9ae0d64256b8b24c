mod acquirer;
mod device;
mod error;
mod permission;
mod position;
mod sensor;

pub use acquirer::{AcquisitionSettings, LocationAcquirer, MAX_PRECISE_ATTEMPTS};
pub use device::{AcquisitionMode, DeviceFamily, DeviceProfile, profile_for};
pub use error::LocationError;
pub use permission::PermissionNegotiator;
pub use position::{Position, validate_coordinates};
pub use sensor::{
    PermissionQuery, PermissionState, PositionSensor, RawReading, ReplaySensor, ReplayStep,
    SensorError, SensorOptions,
};
