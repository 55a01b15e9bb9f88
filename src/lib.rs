//! Airpark - predictive collision avoidance in a bounded arena
//!
//! Core modules:
//! - `sim`: Deterministic simulation (predictors, controllers, real-time driver)
//! - `score`: Monte Carlo risk scoring over many seeds
//! - `params`: Tunable avoidance parameters
//! - `error`: Error types shared by the library and CLI

pub mod error;
pub mod params;
pub mod score;
pub mod sim;

pub use error::SimError;
pub use params::Params;
pub use score::{ScoreOptions, ScoreRecord, ScoreTask, score_params};
pub use sim::{Simulation, SimConfig};

use glam::DVec2;

/// Simulation configuration constants
pub mod consts {
    /// Standard gravity (m/s²), converts g-load into lateral acceleration
    pub const GRAVITY: f64 = 9.81;
    /// Floor for divisions by speed/length
    pub const EPSILON: f64 = 1e-9;
    /// Relative speed² below which two tracks count as parallel
    pub const PARALLEL_EPSILON: f64 = 1e-12;

    /// Arena dimensions (meters)
    pub const WORLD_W: f64 = 900.0;
    pub const WORLD_H: f64 = 600.0;

    /// Roster size bounds
    pub const MIN_AIRCRAFT: usize = 2;
    pub const DEFAULT_MAX_AIRCRAFT: usize = 8;
    pub const DEFAULT_INITIAL_AIRCRAFT: usize = 5;

    /// Aircraft defaults
    pub const INITIAL_SPEED: f64 = 53.6;
    pub const DEFAULT_ACCEL: f64 = 10.0;
    pub const DEFAULT_DECEL: f64 = 10.0;

    /// Largest frame delta the real-time driver will integrate
    pub const MAX_FRAME_DT: f64 = 0.06;

    /// Baseline pilot: small heading bump every few seconds
    pub const PILOT_BUMP_INTERVAL_S: f64 = 2.0;
    pub const PILOT_BUMP_DEG: f64 = 10.0;

    /// Arc maneuvers turn through at most half a circle and exit halfway
    pub const ARC_TOTAL_ANGLE: f64 = std::f64::consts::PI;
    pub const ARC_EXIT_FRACTION: f64 = 0.5;
    /// Lower bound on time-to-approach when scaling midair g-load
    pub const CLOSURE_TAU_S: f64 = 0.5;
    /// Extra distance added to the wall padding before a wall trigger
    pub const WALL_PADDING_SLACK: f64 = 5.0;

    /// Real-time collision policy
    pub const RT_COLLISION_THRESHOLD: f64 = 10.0;
    pub const COLLISION_WINDOW_S: f64 = 10.0;

    /// Chart cadence (~12.5 Hz) and retained history
    pub const HISTORY_DT: f64 = 0.08;
    pub const HISTORY_SECONDS: f64 = 120.0;
    /// Number of trigger rows surfaced to a log view
    pub const TRIGGER_VIEW_LEN: usize = 2000;

    /// Batch scorer defaults
    pub const BATCH_COLLISION_RADIUS: f64 = 20.0;
    pub const BATCH_NEAR_MISS: f64 = 30.0;
    pub const BATCH_DT_MIN: f64 = 0.01;
    pub const BATCH_DT_MAX: f64 = 0.2;
    /// Fraction of the next event time taken as the step
    pub const BATCH_EVENT_FRACTION: f64 = 0.25;
    /// Step horizon used when nothing else is pending
    pub const BATCH_IDLE_HORIZON_S: f64 = 1.0;
    /// Step horizon while an out-of-bounds return is about to arm
    pub const BATCH_OOB_HORIZON_S: f64 = 0.05;
    pub const HOURS_PER_DECADE: f64 = 10.0 * 365.0 * 24.0;
}

/// Rotate a vector counter-clockwise by `angle` radians
#[inline]
pub fn rotate(v: DVec2, angle: f64) -> DVec2 {
    DVec2::from_angle(angle).rotate(v)
}

/// Unit vector of `v`, or +X when `v` is (nearly) zero
#[inline]
pub fn unit_or_x(v: DVec2) -> DVec2 {
    v.try_normalize().unwrap_or(DVec2::X)
}

/// Unit vector with the length floored at [`consts::EPSILON`]
#[inline]
pub fn unit_floored(v: DVec2) -> DVec2 {
    v / v.length().max(consts::EPSILON)
}

/// Signed angle from `from` to `to` in (-π, π]
#[inline]
pub fn signed_angle(from: DVec2, to: DVec2) -> f64 {
    let cross = from.perp_dot(to);
    let dot = from.dot(to).clamp(-1.0, 1.0);
    cross.atan2(dot)
}

/// Every unordered index pair `(i, j)` with `i < j`, in roster order
pub fn index_pairs(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j)))
}
