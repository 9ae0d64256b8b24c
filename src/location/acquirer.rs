//! Position acquisition with retry, accuracy escalation and a short-lived cache.
//!
//! [`LocationAcquirer::acquire_fast`] fires at most one sensor read and prefers a
//! fresh cached fix. [`LocationAcquirer::acquire_precise`] escalates across up to
//! three attempts:
//!
//! 1. strict: high accuracy, device-tuned timeout, accept at or under the
//!    accuracy threshold;
//! 2. extended: longer timeout, accept whichever of this reading and the
//!    running best is more accurate;
//! 3. relaxed: high accuracy off, fixed generous timeout, accept anything
//!    (but never something worse than the running best).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::device::{AcquisitionMode, DeviceProfile, TIMEOUT_CAP};
use super::error::LocationError;
use super::position::Position;
use super::sensor::{PositionSensor, SensorOptions};

/// Hard ceiling on sensor reads per precise acquisition.
pub const MAX_PRECISE_ATTEMPTS: u32 = 3;

/// Tunables for acquisition. See `FieldConfig` for where these come from.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// A cached fix younger than this satisfies `acquire_fast`.
    pub freshness: Duration,
    pub max_attempts: u32,
    /// Meters. Attempt 1 accepts a reading at or under this.
    pub accuracy_threshold: f64,
    /// Added to the timeout on each extended attempt.
    pub timeout_step: Duration,
    pub timeout_cap: Duration,
    /// Timeout of the final relaxed attempt.
    pub final_timeout: Duration,
    /// Wait after a transient failure.
    pub retry_delay: Duration,
    /// Wait before the final relaxed attempt.
    pub escalation_delay: Duration,
    /// How often a queued precise call re-checks for its turn.
    pub poll_interval: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(60),
            max_attempts: MAX_PRECISE_ATTEMPTS,
            accuracy_threshold: 10.0,
            timeout_step: Duration::from_secs(10),
            timeout_cap: TIMEOUT_CAP,
            final_timeout: Duration::from_secs(45),
            retry_delay: Duration::from_secs(2),
            escalation_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl AcquisitionSettings {
    fn attempt_budget(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_PRECISE_ATTEMPTS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Strict,
    Extended,
    Relaxed,
}

impl Phase {
    fn for_attempt(number: u32, budget: u32) -> Self {
        if number == 1 {
            Phase::Strict
        } else if number == budget {
            Phase::Relaxed
        } else {
            Phase::Extended
        }
    }
}

/// Bookkeeping for one read inside a precise acquisition. Never persisted.
#[derive(Debug)]
struct AcquisitionAttempt<'a> {
    number: u32,
    phase: Phase,
    options: SensorOptions,
    best: Option<&'a Position>,
}

impl AcquisitionAttempt<'_> {
    fn trace(&self) {
        debug!(
            attempt = self.number,
            phase = ?self.phase,
            high_accuracy = self.options.high_accuracy,
            timeout_ms = u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX),
            best_accuracy = ?self.best.map(Position::accuracy),
            "requesting position"
        );
    }
}

enum Verdict {
    Accept(Position),
    Continue(Position),
}

#[derive(Debug)]
struct CachedFix {
    position: Position,
    stored_at: Instant,
}

/// Clears the in-flight flag however the precise acquisition exits.
struct PreciseTurn<'a>(&'a AtomicBool);

impl Drop for PreciseTurn<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wraps a [`PositionSensor`] for one device.
///
/// Holds the most recent successful fix as private, in-memory state; nothing
/// here survives the process.
pub struct LocationAcquirer<S> {
    sensor: S,
    device: DeviceProfile,
    settings: AcquisitionSettings,
    cache: Mutex<Option<CachedFix>>,
    precise_in_flight: AtomicBool,
}

impl<S: PositionSensor> LocationAcquirer<S> {
    pub fn new(sensor: S, device: DeviceProfile, settings: AcquisitionSettings) -> Self {
        Self {
            sensor,
            device,
            settings,
            cache: Mutex::new(None),
            precise_in_flight: AtomicBool::new(false),
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// True iff a cached fix exists and is younger than the freshness bound.
    pub fn can_use_cached(&self) -> bool {
        self.fresh_cached().is_some()
    }

    /// Cached fix if fresh, otherwise a single device-tuned read. No retries.
    pub async fn acquire_fast(&self) -> Result<Position, LocationError> {
        if let Some(position) = self.fresh_cached() {
            debug!(accuracy = position.accuracy(), "using cached position");
            return Ok(position);
        }
        self.ensure_supported()?;

        let options = self.tuned_options(AcquisitionMode::Fast);
        let position = self.read(&options, 1).await?;
        Ok(self.remember(position))
    }

    /// Escalating acquisition; resolves to the most accurate fix seen.
    ///
    /// Overlapping calls queue behind the one in flight rather than reading
    /// the sensor concurrently.
    pub async fn acquire_precise(&self) -> Result<Position, LocationError> {
        let _turn = self.wait_for_precise_turn().await;
        self.ensure_supported()?;

        let budget = self.settings.attempt_budget();
        let mut best: Option<Position> = None;
        let mut last_error: Option<LocationError> = None;

        for number in 1..=budget {
            let phase = Phase::for_attempt(number, budget);
            if number > 1 {
                let wait = match phase {
                    Phase::Relaxed => self.settings.escalation_delay,
                    _ if last_error.is_some() => self.settings.retry_delay,
                    _ => Duration::ZERO,
                };
                if !wait.is_zero() {
                    sleep(wait).await;
                }
            }

            let options = self.precise_options(phase, number);
            AcquisitionAttempt {
                number,
                phase,
                options,
                best: best.as_ref(),
            }
            .trace();

            match self.read(&options, number).await {
                Ok(position) => {
                    last_error = None;
                    match self.judge(phase, position, best.take()) {
                        Verdict::Accept(position) => return Ok(self.remember(position)),
                        Verdict::Continue(position) => best = Some(position),
                    }
                }
                Err(err) if !err.is_retryable() => {
                    warn!(attempt = number, %err, "aborting acquisition");
                    return Err(err);
                }
                Err(err) => {
                    debug!(attempt = number, %err, "transient acquisition failure");
                    last_error = Some(err);
                }
            }
        }

        if let Some(position) = best {
            return Ok(self.remember(position));
        }
        Err(last_error
            .unwrap_or(LocationError::PositionUnavailable {
                family: self.device.family,
                attempts: budget,
            })
            .after_attempts(budget))
    }

    /// One bounded sensor read, validated into a [`Position`].
    pub(crate) async fn read(
        &self,
        options: &SensorOptions,
        attempt: u32,
    ) -> Result<Position, LocationError> {
        let family = self.device.family;
        let reading = match timeout(options.timeout, self.sensor.get_position(options)).await {
            Ok(result) => result.map_err(|e| LocationError::from_sensor(e, family, attempt))?,
            Err(_) => {
                return Err(LocationError::Timeout {
                    family,
                    attempts: attempt,
                });
            }
        };

        Position::from_reading(&reading, &self.device, Utc::now()).map_err(|err| {
            warn!(%err, "discarding invalid sensor reading");
            LocationError::PositionUnavailable {
                family,
                attempts: attempt,
            }
        })
    }

    /// Overwrite the cache with a freshly acquired fix.
    pub(crate) fn remember(&self, position: Position) -> Position {
        info!(
            latitude = position.latitude(),
            longitude = position.longitude(),
            accuracy = position.accuracy(),
            device = %position.device().name,
            "position acquired"
        );
        *self.lock_cache() = Some(CachedFix {
            position: position.clone(),
            stored_at: Instant::now(),
        });
        position
    }

    pub(crate) fn ensure_supported(&self) -> Result<(), LocationError> {
        if self.sensor.is_supported() {
            Ok(())
        } else {
            Err(LocationError::Unsupported {
                family: self.device.family,
            })
        }
    }

    fn fresh_cached(&self) -> Option<Position> {
        self.lock_cache()
            .as_ref()
            .filter(|fix| fix.stored_at.elapsed() < self.settings.freshness)
            .map(|fix| fix.position.clone())
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<CachedFix>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_for_precise_turn(&self) -> PreciseTurn<'_> {
        while self
            .precise_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("precise acquisition already running; waiting");
            sleep(self.settings.poll_interval).await;
        }
        PreciseTurn(&self.precise_in_flight)
    }

    /// Device-tuned options bounded by the configured timeout cap.
    pub(crate) fn tuned_options(&self, mode: AcquisitionMode) -> SensorOptions {
        self.device.options_capped(mode, self.settings.timeout_cap)
    }

    fn precise_options(&self, phase: Phase, number: u32) -> SensorOptions {
        let base = self.tuned_options(AcquisitionMode::Precise);
        match phase {
            Phase::Strict => base,
            Phase::Extended => SensorOptions {
                timeout: (base.timeout + self.settings.timeout_step * (number - 1))
                    .min(self.settings.timeout_cap),
                ..base
            },
            Phase::Relaxed => SensorOptions {
                high_accuracy: false,
                timeout: self.settings.final_timeout,
                ..base
            },
        }
    }

    fn judge(&self, phase: Phase, position: Position, best: Option<Position>) -> Verdict {
        match (phase, best) {
            (Phase::Relaxed, Some(best)) if best.is_better_than(&position) => Verdict::Accept(best),
            (Phase::Relaxed, _) => Verdict::Accept(position),
            (Phase::Extended, Some(best)) => {
                if position.is_better_than(&best) {
                    Verdict::Accept(position)
                } else {
                    Verdict::Accept(best)
                }
            }
            (_, _) if position.accuracy() <= self.settings.accuracy_threshold => {
                Verdict::Accept(position)
            }
            (_, Some(best)) if best.is_better_than(&position) => Verdict::Continue(best),
            _ => Verdict::Continue(position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::device::DeviceFamily;
    use crate::location::sensor::{ReplaySensor, ReplayStep, SensorError};
    use proptest::prelude::*;

    fn acquirer(steps: Vec<ReplayStep>) -> LocationAcquirer<ReplaySensor> {
        LocationAcquirer::new(
            ReplaySensor::new(steps),
            DeviceProfile::new(DeviceFamily::AndroidChrome, false),
            AcquisitionSettings::default(),
        )
    }

    fn fix(accuracy: f64) -> ReplayStep {
        ReplayStep::fix(-23.5505, -46.6333, accuracy)
    }

    // --- acquire_fast ---

    #[tokio::test(start_paused = true)]
    async fn fast_reuses_cache_within_freshness() {
        let acq = acquirer(vec![fix(12.0), fix(3.0)]);
        let first = acq.acquire_fast().await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = acq.acquire_fast().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(acq.sensor().calls(), 1);
        assert!(acq.can_use_cached());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_reads_again_once_cache_is_stale() {
        let acq = acquirer(vec![fix(12.0), fix(3.0)]);
        acq.acquire_fast().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!acq.can_use_cached());

        let fresh = acq.acquire_fast().await.unwrap();
        assert_eq!(fresh.accuracy(), 3.0);
        assert_eq!(acq.sensor().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_never_retries() {
        let acq = acquirer(vec![ReplayStep::error(SensorError::Unavailable), fix(3.0)]);
        let err = acq.acquire_fast().await.unwrap_err();
        assert!(matches!(err, LocationError::PositionUnavailable { attempts: 1, .. }));
        assert_eq!(acq.sensor().calls(), 1);
        assert!(!acq.can_use_cached());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_uses_device_tuned_options() {
        let acq = acquirer(vec![fix(3.0)]);
        acq.acquire_fast().await.unwrap();
        assert_eq!(
            acq.sensor().options_seen(),
            vec![acq.tuned_options(AcquisitionMode::Fast)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sensor_is_a_timeout() {
        let acq = acquirer(vec![fix(3.0).delayed(120_000)]);
        let err = acq.acquire_fast().await.unwrap_err();
        assert!(matches!(err, LocationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn unsupported_sensor_makes_no_reads() {
        let acq = LocationAcquirer::new(
            ReplaySensor::unsupported(),
            DeviceProfile::default(),
            AcquisitionSettings::default(),
        );
        assert!(matches!(
            acq.acquire_fast().await,
            Err(LocationError::Unsupported { .. })
        ));
        assert!(matches!(
            acq.acquire_precise().await,
            Err(LocationError::Unsupported { .. })
        ));
        assert_eq!(acq.sensor().calls(), 0);
    }

    // --- acquire_precise ---

    #[tokio::test(start_paused = true)]
    async fn extended_attempt_timeout_stops_at_the_cap() {
        let mut settings = AcquisitionSettings::default();
        settings.timeout_step = Duration::from_secs(40);
        let acq = LocationAcquirer::new(
            ReplaySensor::new(vec![fix(25.0), fix(40.0)]),
            DeviceProfile::new(DeviceFamily::AndroidChrome, false),
            settings,
        );
        acq.acquire_precise().await.unwrap();

        let seen = acq.sensor().options_seen();
        assert_eq!(seen[0].timeout, Duration::from_secs(30));
        assert_eq!(seen[1].timeout, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_cap_bounds_mobile_allowance() {
        let mut settings = AcquisitionSettings::default();
        settings.timeout_cap = Duration::from_secs(25);
        let acq = LocationAcquirer::new(
            ReplaySensor::new(vec![fix(5.0)]),
            DeviceProfile::new(DeviceFamily::AndroidChrome, true),
            settings,
        );
        acq.acquire_fast().await.unwrap();
        // 20 s fast timeout + 10 s mobile allowance, held to 25 s.
        assert_eq!(
            acq.sensor().options_seen()[0].timeout,
            Duration::from_secs(25)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn precise_accepts_accurate_first_attempt() {
        let acq = acquirer(vec![fix(8.0), fix(2.0)]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 8.0);
        assert_eq!(acq.sensor().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn precise_accepts_better_second_attempt() {
        let acq = acquirer(vec![fix(25.0), fix(15.0), fix(2.0)]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 15.0);
        assert_eq!(acq.sensor().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn precise_keeps_running_best_over_worse_second_attempt() {
        let acq = acquirer(vec![fix(25.0), fix(40.0), fix(2.0)]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 25.0);
        assert_eq!(acq.sensor().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn precise_escalates_options_each_attempt() {
        let acq = acquirer(vec![
            ReplayStep::error(SensorError::Timeout),
            fix(30.0),
            fix(50.0),
        ]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 30.0);

        let seen = acq.sensor().options_seen();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].high_accuracy);
        assert_eq!(seen[0].timeout, Duration::from_secs(30));
        assert!(seen[1].high_accuracy);
        assert_eq!(seen[1].timeout, Duration::from_secs(40));
        assert!(!seen[2].high_accuracy);
        assert_eq!(seen[2].timeout, Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn precise_final_attempt_accepts_anything() {
        let acq = acquirer(vec![
            ReplayStep::error(SensorError::Unavailable),
            ReplayStep::error(SensorError::Timeout),
            fix(480.0),
        ]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 480.0);
        assert!(acq.can_use_cached());
    }

    #[tokio::test(start_paused = true)]
    async fn precise_gives_up_after_three_attempts() {
        let acq = acquirer(vec![
            ReplayStep::error(SensorError::Unavailable),
            ReplayStep::error(SensorError::Unavailable),
            ReplayStep::error(SensorError::Timeout),
            fix(5.0),
        ]);
        let err = acq.acquire_precise().await.unwrap_err();
        assert_eq!(
            err,
            LocationError::Timeout {
                family: DeviceFamily::AndroidChrome,
                attempts: 3
            }
        );
        assert_eq!(acq.sensor().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn precise_returns_best_when_later_attempts_fail() {
        let acq = acquirer(vec![
            fix(25.0),
            ReplayStep::error(SensorError::Timeout),
            ReplayStep::error(SensorError::Unavailable),
        ]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_aborts_immediately() {
        let acq = acquirer(vec![ReplayStep::error(SensorError::PermissionDenied), fix(5.0)]);
        let err = acq.acquire_precise().await.unwrap_err();
        assert!(matches!(err, LocationError::PermissionDenied { .. }));
        assert_eq!(acq.sensor().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_reading_is_retried_like_unavailable() {
        let acq = acquirer(vec![ReplayStep::fix(95.0, 0.0, 5.0), fix(6.0)]);
        let position = acq.acquire_precise().await.unwrap();
        assert_eq!(position.accuracy(), 6.0);
        assert_eq!(acq.sensor().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn precise_backs_off_between_attempts() {
        let acq = acquirer(vec![
            ReplayStep::error(SensorError::Unavailable),
            ReplayStep::error(SensorError::Unavailable),
            ReplayStep::error(SensorError::Unavailable),
        ]);
        let started = Instant::now();
        acq.acquire_precise().await.unwrap_err();
        let elapsed = started.elapsed();
        // 2 s after the first failure, 3 s before the relaxed attempt.
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_precise_calls_never_read_concurrently() {
        let acq = acquirer(vec![
            fix(25.0).delayed(1500),
            fix(15.0).delayed(1500),
            fix(9.0).delayed(1500),
        ]);
        let (a, b) = tokio::join!(acq.acquire_precise(), acq.acquire_precise());

        assert_eq!(a.unwrap().accuracy(), 15.0);
        assert_eq!(b.unwrap().accuracy(), 9.0);
        assert_eq!(acq.sensor().max_concurrent_reads(), 1);
        assert_eq!(acq.sensor().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_is_clamped() {
        let mut settings = AcquisitionSettings::default();
        settings.max_attempts = 10;
        let acq = LocationAcquirer::new(
            ReplaySensor::new(Vec::new()),
            DeviceProfile::default(),
            settings,
        );
        acq.acquire_precise().await.unwrap_err();
        assert_eq!(acq.sensor().calls(), MAX_PRECISE_ATTEMPTS as usize);
    }

    fn outcome() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![Just(None), (1.0f64..200.0).prop_map(Some)]
    }

    proptest! {
        #[test]
        fn precise_result_is_best_observed(script in proptest::collection::vec(outcome(), 3)) {
            let steps: Vec<ReplayStep> = script
                .iter()
                .map(|o| match o {
                    Some(acc) => fix(*acc),
                    None => ReplayStep::error(SensorError::Unavailable),
                })
                .collect();
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let acq = acquirer(steps);
            let result = rt.block_on(acq.acquire_precise());

            let calls = acq.sensor().calls();
            prop_assert!(calls <= 3);
            let observed: Vec<f64> = script[..calls].iter().flatten().copied().collect();
            match result {
                Ok(position) => {
                    let worst = observed.iter().copied().fold(f64::MIN, f64::max);
                    let best = observed.iter().copied().fold(f64::MAX, f64::min);
                    prop_assert!(position.accuracy() <= worst);
                    prop_assert_eq!(position.accuracy(), best);
                }
                Err(_) => prop_assert!(observed.is_empty()),
            }
        }
    }
}
