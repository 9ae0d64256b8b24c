use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::acquirer::LocationAcquirer;
use super::device::AcquisitionMode;
use super::error::LocationError;
use super::position::Position;
use super::sensor::{PermissionQuery, PermissionState, PositionSensor, SensorOptions};

/// Prompt attempts for families that need more than one.
pub const PROMPT_ATTEMPTS: u32 = 3;

/// Wait between prompt attempts.
pub const PROMPT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Best-effort permission helpers layered on an acquirer's sensor.
///
/// Nothing here gates acquisition: `current_state` is advisory and `prompt`
/// is an optional warm-up that happens to fill the acquirer's cache.
pub struct PermissionNegotiator<'a, S, P> {
    acquirer: &'a LocationAcquirer<S>,
    permissions: &'a P,
}

impl<'a, S, P> PermissionNegotiator<'a, S, P>
where
    S: PositionSensor,
    P: PermissionQuery,
{
    pub fn new(acquirer: &'a LocationAcquirer<S>, permissions: &'a P) -> Self {
        Self {
            acquirer,
            permissions,
        }
    }

    /// Current grant as reported by the platform, or `Unknown`.
    pub async fn current_state(&self) -> PermissionState {
        let state = self
            .permissions
            .query_geolocation_grant()
            .await
            .unwrap_or(PermissionState::Unknown);
        debug!(%state, "geolocation permission state");
        state
    }

    /// Surface the permission prompt by requesting a relaxed fix.
    ///
    /// Families whose grant tends not to stick on the first prompt get up to
    /// [`PROMPT_ATTEMPTS`] tries. A denial always ends it immediately.
    pub async fn prompt(&self) -> Result<Position, LocationError> {
        self.acquirer.ensure_supported()?;

        let device = self.acquirer.device();
        let attempts = if device.family.needs_repeated_prompts() {
            PROMPT_ATTEMPTS
        } else {
            1
        };
        let options = SensorOptions {
            high_accuracy: false,
            ..self.acquirer.tuned_options(AcquisitionMode::Fast)
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(PROMPT_RETRY_DELAY).await;
            }
            match self.acquirer.read(&options, attempt).await {
                Ok(position) => return Ok(self.acquirer.remember(position)),
                Err(err @ LocationError::PermissionDenied { .. }) => {
                    warn!(family = %device.family, "location permission denied at prompt");
                    return Err(err);
                }
                Err(err) => {
                    debug!(attempt, %err, "permission prompt attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or(LocationError::PositionUnavailable {
                family: device.family,
                attempts,
            })
            .after_attempts(attempts))
    }
}
