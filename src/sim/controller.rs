//! Single-aircraft integrator
//!
//! One deterministic step: speed convergence, the active controller's
//! heading change, then position integration.

use std::f64::consts::PI;

use glam::DVec2;

use super::predictors::turn_rate;
use super::state::{Aircraft, ArcTurn, Controller, ReturnToBox};
use crate::{rotate, signed_angle};

impl ArcTurn {
    /// Heading change for this step; marks the turn done at the exit fraction
    pub fn advance(&mut self, speed: f64, dt: f64) -> f64 {
        let omega = turn_rate(self.g_limit, speed);
        let dtheta = (omega * dt).clamp(-PI, PI) * self.direction.sign();
        self.advanced += dtheta.abs();
        if self.advanced / self.effective_total() >= self.exit_fraction {
            self.done = true;
        }
        dtheta
    }
}

impl ReturnToBox {
    /// Heading change toward `desired`, limited to the turn rate for this step
    pub fn steer(&self, heading: DVec2, speed: f64, dt: f64) -> f64 {
        let max_turn = turn_rate(self.g_limit, speed) * dt;
        signed_angle(heading, self.desired).clamp(-max_turn, max_turn)
    }
}

/// Advance `a` by `dt` seconds under its active controller
pub fn integrate(a: &mut Aircraft, dt: f64) {
    let dv = a.target_speed - a.speed;
    let accel = if dt > 0.0 {
        (dv / dt).clamp(-a.decel, a.accel)
    } else {
        0.0
    };
    a.speed += accel * dt;

    let speed = a.speed;
    let heading = a.heading();
    let dtheta = match a.active_controller_mut() {
        Controller::NormalMotion => 0.0,
        Controller::ArcTurn(arc) => arc.advance(speed, dt),
        Controller::ReturnToBox(rtb) => rtb.steer(heading, speed, dt),
    };

    a.vel = rotate(heading, dtheta) * a.speed;
    a.pos += a.vel * dt;
}
