//! Entities and controller state
//!
//! Aircraft carry their own maneuver slots and timers so that a roster
//! reset drops every piece of per-aircraft state at once.

use glam::DVec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::consts::*;

/// Rectangular flight area with the origin at one corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    pub width: f64,
    pub height: f64,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            width: WORLD_W,
            height: WORLD_H,
        }
    }
}

impl Arena {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> DVec2 {
        DVec2::new(self.width * 0.5, self.height * 0.5)
    }

    pub fn is_out_of_bounds(&self, p: DVec2) -> bool {
        p.x < 0.0 || p.x > self.width || p.y < 0.0 || p.y > self.height
    }

    /// True when `p` lies at least `margin` inside every edge
    pub fn is_inside_margin(&self, p: DVec2, margin: f64) -> bool {
        p.x >= margin && p.x <= self.width - margin && p.y >= margin && p.y <= self.height - margin
    }

    /// Nearest point on or inside the arena
    pub fn clamp_point(&self, p: DVec2) -> DVec2 {
        DVec2::new(p.x.clamp(0.0, self.width), p.y.clamp(0.0, self.height))
    }

    /// Smallest signed distance to any edge (negative outside)
    pub fn edge_distance(&self, p: DVec2) -> f64 {
        p.x.min(self.width - p.x).min(p.y).min(self.height - p.y)
    }
}

/// Turn sense of an arc maneuver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnDirection {
    /// Counter-clockwise, +1
    Left,
    /// Clockwise, -1
    Right,
}

impl TurnDirection {
    pub fn sign(self) -> f64 {
        match self {
            TurnDirection::Left => 1.0,
            TurnDirection::Right => -1.0,
        }
    }

    /// Left for non-negative values, Right otherwise
    pub fn from_sign(value: f64) -> Self {
        if value >= 0.0 {
            TurnDirection::Left
        } else {
            TurnDirection::Right
        }
    }
}

/// What armed an arc maneuver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerSource {
    Midair,
    Wall,
}

/// Coordinated constant-g turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcTurn {
    pub direction: TurnDirection,
    pub g_limit: f64,
    /// Angle ceiling of the maneuver (rad)
    pub total_angle: f64,
    /// Heading change applied so far (rad, unsigned)
    pub advanced: f64,
    pub source: TriggerSource,
    /// Fraction of `total_angle` after which the turn completes
    pub exit_fraction: f64,
    pub trigger_id: Option<String>,
    pub done: bool,
}

impl ArcTurn {
    pub fn new(
        direction: TurnDirection,
        g_limit: f64,
        source: TriggerSource,
        trigger_id: Option<String>,
    ) -> Self {
        Self {
            direction,
            g_limit,
            total_angle: ARC_TOTAL_ANGLE,
            advanced: 0.0,
            source,
            exit_fraction: ARC_EXIT_FRACTION,
            trigger_id,
            done: false,
        }
    }

    /// Total angle with a zero ceiling treated as a half circle
    pub fn effective_total(&self) -> f64 {
        if self.total_angle > 0.0 {
            self.total_angle
        } else {
            ARC_TOTAL_ANGLE
        }
    }

    /// Heading change still needed before the exit fraction is reached
    pub fn remaining_angle(&self) -> f64 {
        (self.exit_fraction * self.effective_total() - self.advanced).max(0.0)
    }
}

/// Proportional steer toward a desired heading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnToBox {
    pub g_limit: f64,
    /// Desired unit heading
    pub desired: DVec2,
}

/// Closed set of flight controllers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Controller {
    #[default]
    NormalMotion,
    ArcTurn(ArcTurn),
    ReturnToBox(ReturnToBox),
}

/// Discriminant of [`Controller`] for logs and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerKind {
    NormalMotion,
    ArcTurn,
    ReturnToBox,
}

impl Controller {
    pub fn kind(&self) -> ControllerKind {
        match self {
            Controller::NormalMotion => ControllerKind::NormalMotion,
            Controller::ArcTurn(_) => ControllerKind::ArcTurn,
            Controller::ReturnToBox(_) => ControllerKind::ReturnToBox,
        }
    }

    pub fn trigger_id(&self) -> Option<&str> {
        match self {
            Controller::ArcTurn(arc) => arc.trigger_id.as_deref(),
            _ => None,
        }
    }
}

/// Override slots, at most one controller each
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Overrides {
    pub midair: Option<Controller>,
    pub wall: Option<Controller>,
}

/// A simulated aircraft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: String,
    pub pos: DVec2,
    pub vel: DVec2,
    /// Always equal to `vel.length()` after an integration step
    pub speed: f64,
    pub target_speed: f64,
    pub accel: f64,
    pub decel: f64,
    pub overrides: Overrides,
    /// Base controller used when no override is armed
    pub motion: Controller,
    /// Seconds since the last pilot heading bump
    pub bump_timer: f64,
    /// Seconds spent continuously outside the arena
    pub oob_time: f64,
    /// Seconds of continuously opening separation under a midair arc
    pub open_time: f64,
}

impl Aircraft {
    /// Aircraft at `pos` flying along `heading` (rad) at `speed`
    pub fn new(id: impl Into<String>, pos: DVec2, heading: f64, speed: f64) -> Self {
        Self {
            id: id.into(),
            pos,
            vel: DVec2::from_angle(heading) * speed,
            speed,
            target_speed: speed,
            accel: DEFAULT_ACCEL,
            decel: DEFAULT_DECEL,
            overrides: Overrides::default(),
            motion: Controller::NormalMotion,
            bump_timer: 0.0,
            oob_time: 0.0,
            open_time: 0.0,
        }
    }

    /// Random position inside the arena, random heading, initial speed
    pub fn random<R: Rng>(id: impl Into<String>, arena: &Arena, rng: &mut R) -> Self {
        let pos = DVec2::new(
            rng.random::<f64>() * arena.width,
            rng.random::<f64>() * arena.height,
        );
        let heading = rng.random::<f64>() * std::f64::consts::TAU;
        Self::new(id, pos, heading, INITIAL_SPEED)
    }

    /// Controller that the integrator will run: midair, then wall, then base
    pub fn active_controller(&self) -> &Controller {
        self.overrides
            .midair
            .as_ref()
            .or(self.overrides.wall.as_ref())
            .unwrap_or(&self.motion)
    }

    pub fn active_controller_mut(&mut self) -> &mut Controller {
        if let Some(c) = self.overrides.midair.as_mut() {
            c
        } else if let Some(c) = self.overrides.wall.as_mut() {
            c
        } else {
            &mut self.motion
        }
    }

    pub fn has_override(&self) -> bool {
        self.overrides.midair.is_some() || self.overrides.wall.is_some()
    }

    /// A midair-sourced arc holds the midair slot
    pub fn midair_arc_active(&self) -> bool {
        matches!(
            &self.overrides.midair,
            Some(Controller::ArcTurn(arc)) if arc.source == TriggerSource::Midair
        )
    }

    pub fn return_to_box_active(&self) -> bool {
        matches!(self.overrides.wall, Some(Controller::ReturnToBox(_)))
    }

    pub fn heading(&self) -> DVec2 {
        crate::unit_or_x(self.vel)
    }
}

/// Build `count` randomized aircraft with ids `A{first_id}`, `A{first_id + 1}`, ...
pub fn spawn_roster<R: Rng>(count: usize, first_id: u32, arena: &Arena, rng: &mut R) -> Vec<Aircraft> {
    (0..count)
        .map(|i| Aircraft::random(format!("A{}", first_id as usize + i), arena, rng))
        .collect()
}
