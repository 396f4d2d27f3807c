//! Time source abstraction for real and simulated time.
//!
//! Everything time-dependent in the orchestrator reads the clock through
//! [`now`] and waits through [`sleep`], so the `simulate` command can replay
//! a span of hours or days against the real schedule logic in seconds.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration as StdDuration, Instant};

static TIME_SOURCE: OnceCell<Arc<dyn TimeSource>> = OnceCell::new();

pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration` (or simulate it).
    fn sleep(&self, duration: StdDuration);

    fn is_simulated(&self) -> bool;

    /// Whether a simulation has reached its end (always false for real time).
    fn is_ended(&self) -> bool {
        false
    }
}

pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: StdDuration) {
        std::thread::sleep(duration);
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_chrono(duration: StdDuration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// Simulated clock between two instants.
///
/// - Fast-forward (multiplier 0): each sleep jumps the clock by exactly the
///   requested amount.
/// - Accelerated (multiplier > 0): time flows at `multiplier` simulated
///   seconds per real second.
pub struct SimulatedTimeSource {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    time_multiplier: f64,
    /// Simulated time slept so far.
    elapsed: Mutex<StdDuration>,
    /// Real start of an in-progress accelerated sleep and its simulated length.
    sleep_in_progress: Mutex<Option<(Instant, StdDuration)>>,
}

impl SimulatedTimeSource {
    /// A negative multiplier falls back to 3600x.
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>, multiplier: f64) -> Self {
        let time_multiplier = if multiplier < 0.0 { 3600.0 } else { multiplier };
        Self {
            start_time,
            end_time,
            time_multiplier,
            elapsed: Mutex::new(StdDuration::ZERO),
            sleep_in_progress: Mutex::new(None),
        }
    }

    pub fn is_fast_forward(&self) -> bool {
        self.time_multiplier == 0.0
    }

    fn remaining(&self) -> StdDuration {
        let current = self.start_time + to_chrono(*lock(&self.elapsed));
        (self.end_time - current).to_std().unwrap_or(StdDuration::ZERO)
    }

    fn current_time(&self) -> DateTime<Utc> {
        let mut elapsed = *lock(&self.elapsed);
        if let Some((started, length)) = *lock(&self.sleep_in_progress) {
            let progressed = started.elapsed().mul_f64(self.time_multiplier);
            elapsed += progressed.min(length);
        }
        (self.start_time + to_chrono(elapsed)).min(self.end_time)
    }
}

impl TimeSource for SimulatedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        self.current_time()
    }

    fn sleep(&self, duration: StdDuration) {
        let step = duration.min(self.remaining());

        if self.is_fast_forward() {
            *lock(&self.elapsed) += step;
            // Let other threads run and flush their output
            std::thread::sleep(StdDuration::from_millis(1));
            return;
        }

        if step.is_zero() {
            return;
        }
        *lock(&self.sleep_in_progress) = Some((Instant::now(), step));
        std::thread::sleep(step.div_f64(self.time_multiplier));
        *lock(&self.sleep_in_progress) = None;
        *lock(&self.elapsed) += step;
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn is_ended(&self) -> bool {
        self.current_time() >= self.end_time
    }
}

/// Install the global time source. Only the first call takes effect.
pub fn init_time_source(source: Arc<dyn TimeSource>) {
    TIME_SOURCE.set(source).ok();
}

pub fn is_initialized() -> bool {
    TIME_SOURCE.get().is_some()
}

fn source() -> &'static Arc<dyn TimeSource> {
    TIME_SOURCE.get_or_init(|| Arc::new(RealTimeSource))
}

pub fn now() -> DateTime<Utc> {
    source().now()
}

pub fn sleep(duration: StdDuration) {
    source().sleep(duration)
}

pub fn is_simulated() -> bool {
    source().is_simulated()
}

pub fn simulation_ended() -> bool {
    source().is_ended()
}

/// Parse `YYYY-MM-DD HH:MM[:SS]` as a wall-clock time in `tz`.
pub fn parse_datetime_in_tz(s: &str, tz: Tz) -> Result<DateTime<Utc>, String> {
    let trimmed = s.trim();
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M"))
        .map_err(|e| format!("Invalid datetime '{s}': {e}. Use YYYY-MM-DD HH:MM:SS"))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("'{s}' does not exist in timezone {tz}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_forward_advances_by_sleep_and_stops_at_end() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let end = start + ChronoDuration::minutes(10);
        let source = SimulatedTimeSource::new(start, end, 0.0);

        source.sleep(StdDuration::from_secs(120));
        assert_eq!(source.now(), start + ChronoDuration::minutes(2));
        assert!(!source.is_ended());

        source.sleep(StdDuration::from_secs(3600));
        assert_eq!(source.now(), end);
        assert!(source.is_ended());
    }

    #[test]
    fn test_parse_datetime_in_tz() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let parsed = parse_datetime_in_tz("2024-01-15 07:00", tz).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
        assert!(parse_datetime_in_tz("tomorrow", tz).is_err());
        // Inside the spring-forward gap
        assert!(parse_datetime_in_tz("2024-03-10 02:30:00", tz).is_err());
    }
}
