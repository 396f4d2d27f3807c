//! Application-wide defaults and validation limits.

// # Scheduling

/// Schedule evaluation interval in seconds.
pub const DEFAULT_TICK_INTERVAL: u64 = 60;
pub const MINIMUM_TICK_INTERVAL: u64 = 10;
pub const MAXIMUM_TICK_INTERVAL: u64 = 300;

/// Update cadence while a brightness ramp is in progress, in milliseconds.
pub const DEFAULT_RAMP_UPDATE_INTERVAL_MS: u64 = 500;
pub const MINIMUM_RAMP_UPDATE_INTERVAL_MS: u64 = 100;
pub const MAXIMUM_RAMP_UPDATE_INTERVAL_MS: u64 = 10_000;

/// Longest window an `end = { type = "duration" }` rule may run, in seconds.
pub const MAXIMUM_RULE_DURATION: u64 = 48 * 3600;

/// Longest brightness ramp, in seconds.
pub const MAXIMUM_RAMP_DURATION: u64 = 24 * 3600;

/// Largest shift from a solar event, in minutes either way.
pub const MAXIMUM_SOLAR_OFFSET_MINUTES: u32 = 720;

/// Largest number of days a holiday observance may extend before or after it.
pub const MAXIMUM_HOLIDAY_WINDOW_DAYS: u32 = 366;

/// Longest the runtime loop blocks without re-checking timers, in milliseconds.
pub const MAXIMUM_IDLE_WAIT_MS: u64 = 1_000;

// # Streaming

pub const DEFAULT_FPS: u32 = 30;
pub const MINIMUM_FPS: u32 = 1;
pub const MAXIMUM_FPS: u32 = 240;

/// Minimum playlist item duration in seconds.
pub const MINIMUM_ITEM_DURATION: u64 = 1;
/// One week.
pub const MAXIMUM_ITEM_DURATION: u64 = 7 * 24 * 3600;

// # Dispatch

pub const DEFAULT_DISPATCH_MAX_ATTEMPTS: u32 = 5;
pub const MINIMUM_DISPATCH_MAX_ATTEMPTS: u32 = 1;
pub const MAXIMUM_DISPATCH_MAX_ATTEMPTS: u32 = 10;

pub const DEFAULT_DISPATCH_BACKOFF_MS: u64 = 250;
pub const MINIMUM_DISPATCH_BACKOFF_MS: u64 = 10;
pub const MAXIMUM_DISPATCH_BACKOFF_MS: u64 = 10_000;

/// Ceiling for a single backoff delay between dispatch retries.
pub const DISPATCH_BACKOFF_CAP_MS: u64 = 8_000;

// # IPC

/// How long the socket server waits for the orchestrator to answer a request.
pub const IPC_REPLY_TIMEOUT_MS: u64 = 2_000;
pub const IPC_POLL_INTERVAL_MS: u64 = 10;

// # Files

pub const CONFIG_FILE_NAME: &str = "lightkeeper.toml";
pub const APP_DIR_NAME: &str = "lightkeeper";
pub const ACTIVE_PLAYBACK_FILE: &str = "active_playback.json";
pub const SOCKET_FILE_NAME: &str = "lightkeeper.sock";
pub const LOCK_FILE_NAME: &str = "lightkeeper.lock";

// # Exit codes

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

#[cfg(any(test, feature = "testing-support"))]
pub mod test_constants {
    /// New York City, used by solar tests.
    pub const TEST_LATITUDE: f64 = 40.7128;
    pub const TEST_LONGITUDE: f64 = -74.0060;
}
