//! Client configuration.

use std::time::Duration;

use skirmish_sim::{Bounds, ENTITY_HEIGHT, ENTITY_WIDTH, FLOOR_Y, SURFACE_HEIGHT, SURFACE_WIDTH};

/// Minimum spacing between two outbound state publishes.
pub const UPDATE_INTERVAL_MS: u64 = 50;

/// Period of the timer-driven callback chain.
pub const TIMER_PERIOD_MS: u64 = 16;

/// dt handed to the simulator on every tick, whatever the real elapsed time.
pub const NOMINAL_DT_MS: u64 = 16;

/// Default capacity of [`crate::sync::QueuedRelay`].
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Display name used when the player leaves the field blank.
pub const DEFAULT_DISPLAY_NAME: &str = "Player";

/// How inbound snapshot fields are merged into the Remote entity.
///
/// Under both policies a direction of 0 and non-finite coordinates are
/// skipped, since neither can be represented by the entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// A field is applied only when present *and* truthy: zero coordinates
    /// and empty colors leave the previous value in place.
    #[default]
    Truthy,
    /// A field is applied whenever it is present, zero included.
    Presence,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub update_interval: Duration,
    pub timer_period: Duration,
    pub nominal_dt: Duration,
    pub surface_width: f64,
    pub surface_height: f64,
    pub floor_y: f64,
    pub merge_policy: MergePolicy,
    pub record_replay: bool,
    pub outbound_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(UPDATE_INTERVAL_MS),
            timer_period: Duration::from_millis(TIMER_PERIOD_MS),
            nominal_dt: Duration::from_millis(NOMINAL_DT_MS),
            surface_width: SURFACE_WIDTH,
            surface_height: SURFACE_HEIGHT,
            floor_y: FLOOR_Y,
            merge_policy: MergePolicy::default(),
            record_replay: false,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

/// A configuration value the client cannot run with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("update interval must be non-zero")]
    ZeroUpdateInterval,

    #[error("timer period must be non-zero")]
    ZeroTimerPeriod,

    #[error("nominal dt must be non-zero")]
    ZeroNominalDt,

    #[error("surface width {0} is narrower than one entity")]
    SurfaceTooNarrow(f64),

    #[error("floor at y={0} leaves no room for an entity")]
    FloorTooHigh(f64),

    #[error("outbound queue capacity must be non-zero")]
    ZeroQueueCapacity,
}

impl ClientConfig {
    /// Simulator bounds derived from the surface and floor.
    pub fn bounds(&self) -> Bounds {
        Bounds {
            surface_width: self.surface_width,
            floor_y: self.floor_y,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval.is_zero() {
            return Err(ConfigError::ZeroUpdateInterval);
        }
        if self.timer_period.is_zero() {
            return Err(ConfigError::ZeroTimerPeriod);
        }
        if self.nominal_dt.is_zero() {
            return Err(ConfigError::ZeroNominalDt);
        }
        if self.surface_width.is_nan() || self.surface_width < ENTITY_WIDTH {
            return Err(ConfigError::SurfaceTooNarrow(self.surface_width));
        }
        if self.floor_y.is_nan() || self.floor_y <= ENTITY_HEIGHT {
            return Err(ConfigError::FloorTooHigh(self.floor_y));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}
