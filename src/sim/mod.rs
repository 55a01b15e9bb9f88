//! Deterministic simulation module
//!
//! All flight logic lives here. Given the same roster, parameters and seed,
//! every step produces the same result:
//! - Seeded RNG only
//! - Stable iteration order (roster order)
//! - No I/O or platform dependencies

pub mod controller;
pub mod passes;
pub mod predictors;
pub mod state;
pub mod telemetry;
pub mod tick;

pub use controller::integrate;
pub use passes::{
    StepContext, attempt_midair, attempt_wall, behavior_pass, cleanup_pass, guardrail_pass,
    trigger_phase,
};
pub use predictors::{
    Approach, ShadowPick, Wall, WallHit, inbound_unit_vector, midair_conflict, nearest_intruder,
    pick_turn_direction, separation_rate, should_trigger_midair, time_of_closest_approach,
    wall_time_to_collision,
};
pub use state::{
    Aircraft, ArcTurn, Arena, Controller, ControllerKind, Overrides, ReturnToBox, TriggerSource,
    TurnDirection, spawn_roster,
};
pub use telemetry::{
    CollisionReport, EventLog, LogSource, NullSink, SeriesBuffer, TriggerLogRow, TriggerSink,
};
pub use tick::{AircraftSnapshot, SimConfig, Simulation};
