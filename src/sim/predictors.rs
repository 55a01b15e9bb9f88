//! Closed-form and shadow-simulation predictors
//!
//! Everything here is a pure function of the current aircraft state. Both the
//! real-time driver and the batch scorer call these, never their own copies.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::state::{Aircraft, Arena, TurnDirection};
use crate::consts::*;
use crate::params::Params;
use crate::{rotate, unit_floored, unit_or_x};

/// Arena edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wall {
    Left,
    Right,
    Top,
    Bottom,
}

/// Predicted boundary crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallHit {
    pub wall: Wall,
    pub time: f64,
}

/// Closest approach of two constant-velocity tracks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Approach {
    /// Time of closest approach (s, non-negative)
    pub t_star: f64,
    /// Separation at `t_star` (m)
    pub d_min: f64,
}

/// Outcome of the shadow turn test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowPick {
    pub direction: TurnDirection,
    /// Smallest predicted separation for the chosen direction
    pub min_sep: f64,
}

/// Non-negative crossing times for each wall the aircraft is heading toward
pub fn wall_crossings(a: &Aircraft, arena: &Arena) -> Vec<WallHit> {
    let vhat = unit_floored(a.vel);
    let s = a.speed;
    let mut hits = Vec::with_capacity(2);

    if vhat.x < -EPSILON {
        hits.push(WallHit {
            wall: Wall::Left,
            time: -a.pos.x / (vhat.x * s),
        });
    }
    if vhat.x > EPSILON {
        hits.push(WallHit {
            wall: Wall::Right,
            time: (arena.width - a.pos.x) / (vhat.x * s),
        });
    }
    if vhat.y < -EPSILON {
        hits.push(WallHit {
            wall: Wall::Top,
            time: -a.pos.y / (vhat.y * s),
        });
    }
    if vhat.y > EPSILON {
        hits.push(WallHit {
            wall: Wall::Bottom,
            time: (arena.height - a.pos.y) / (vhat.y * s),
        });
    }

    hits.retain(|h| h.time >= 0.0);
    hits
}

/// Earliest boundary crossing under straight-line motion, if any
pub fn wall_time_to_collision(a: &Aircraft, arena: &Arena) -> Option<WallHit> {
    wall_crossings(a, arena)
        .into_iter()
        .min_by(|x, y| x.time.total_cmp(&y.time))
}

/// Time and distance of closest approach between `a` and `b`.
///
/// `None` for parallel tracks or when the pair is already receding.
pub fn time_of_closest_approach(a: &Aircraft, b: &Aircraft) -> Option<Approach> {
    let r = a.pos - b.pos;
    let v = a.vel - b.vel;
    let v2 = v.length_squared();
    if v2 < PARALLEL_EPSILON {
        return None;
    }
    let t_star = -r.dot(v) / v2;
    if t_star < 0.0 {
        return None;
    }
    Some(Approach {
        t_star,
        d_min: (r + v * t_star).length(),
    })
}

/// The approach between `a` and `b` if it meets both midair thresholds
pub fn midair_conflict(a: &Aircraft, b: &Aircraft, params: &Params) -> Option<Approach> {
    time_of_closest_approach(a, b)
        .filter(|ap| ap.t_star <= params.mid_ttc_threshold && ap.d_min <= params.mid_sep_trigger)
}

pub fn should_trigger_midair(a: &Aircraft, b: &Aircraft, params: &Params) -> bool {
    midair_conflict(a, b, params).is_some()
}

/// Coordinated-turn rate (rad/s) at `g_limit` and `speed`
#[inline]
pub fn turn_rate(g_limit: f64, speed: f64) -> f64 {
    g_limit * GRAVITY / speed.max(EPSILON)
}

/// Shadow-fly both turn directions and keep the one with more clearance.
///
/// `a` turns at a constant rate for `g_limit`, the intruder holds its
/// velocity. Ties go to [`TurnDirection::Left`].
pub fn pick_turn_direction(
    a: &Aircraft,
    intruder: &Aircraft,
    g_limit: f64,
    params: &Params,
) -> ShadowPick {
    let speed = a.speed;
    let omega = turn_rate(g_limit, speed);
    let steps = (params.horizon_s / params.h_dt).ceil().max(0.0) as usize;

    let min_separation = |direction: TurnDirection| -> f64 {
        let dtheta = (omega * params.h_dt).clamp(-std::f64::consts::PI, std::f64::consts::PI)
            * direction.sign();
        let mut pos = a.pos;
        let mut vel = a.vel;
        let mut min_sep = f64::INFINITY;
        for k in 0..steps {
            vel = rotate(unit_floored(vel), dtheta) * speed;
            pos += vel * params.h_dt;
            let intruder_pos = intruder.pos + intruder.vel * ((k + 1) as f64 * params.h_dt);
            min_sep = min_sep.min(pos.distance(intruder_pos));
        }
        min_sep
    };

    let left = min_separation(TurnDirection::Left);
    let right = min_separation(TurnDirection::Right);
    if left >= right {
        ShadowPick {
            direction: TurnDirection::Left,
            min_sep: left,
        }
    } else {
        ShadowPick {
            direction: TurnDirection::Right,
            min_sep: right,
        }
    }
}

/// Closest other aircraft by current separation
pub fn nearest_intruder<'r>(a: &Aircraft, roster: &'r [Aircraft]) -> Option<&'r Aircraft> {
    roster
        .iter()
        .filter(|b| b.id != a.id)
        .min_by(|x, y| a.pos.distance(x.pos).total_cmp(&a.pos.distance(y.pos)))
}

/// Unit vector from the aircraft toward the nearest point of the arena
pub fn inbound_unit_vector(a: &Aircraft, arena: &Arena) -> DVec2 {
    unit_floored(arena.clamp_point(a.pos) - a.pos)
}

/// Rate of change of separation from `a` to `intruder` (m/s, positive = opening)
pub fn separation_rate(a: &Aircraft, intruder: &Aircraft) -> f64 {
    let r_hat = unit_or_x(intruder.pos - a.pos);
    (intruder.vel - a.vel).dot(r_hat)
}

/// Closing speed of `a` toward `intruder` (m/s, zero when opening)
pub fn closure_speed(a: &Aircraft, intruder: &Aircraft) -> f64 {
    (-separation_rate(a, intruder)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn arena() -> Arena {
        Arena::new(900.0, 600.0)
    }

    #[test]
    fn test_wall_ttc_at_boundary_heading_out() {
        let a = Aircraft::new("A1", DVec2::new(0.0, 300.0), PI, 50.0);
        let hit = wall_time_to_collision(&a, &arena()).unwrap();
        assert_eq!(hit.wall, Wall::Left);
        assert_eq!(hit.time, 0.0);
    }

    #[test]
    fn test_wall_ttc_heading_in_has_no_crossing_for_that_wall() {
        let a = Aircraft::new("A1", DVec2::new(0.0, 300.0), 0.0, 50.0);
        let hits = wall_crossings(&a, &arena());
        assert!(hits.iter().all(|h| h.wall != Wall::Left));
        let hit = wall_time_to_collision(&a, &arena()).unwrap();
        assert_eq!(hit.wall, Wall::Right);
        assert!((hit.time - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_wall_ttc_none_when_receding_from_every_wall() {
        // Outside the left edge, flying further out
        let a = Aircraft::new("A1", DVec2::new(-10.0, -10.0), -3.0 * PI / 4.0, 50.0);
        assert!(wall_time_to_collision(&a, &arena()).is_none());
    }

    #[test]
    fn test_wall_ttc_picks_earliest() {
        // Heading diagonally toward the top-left corner, closer to the top
        let a = Aircraft::new("A1", DVec2::new(100.0, 50.0), -3.0 * PI / 4.0, 50.0);
        let hit = wall_time_to_collision(&a, &arena()).unwrap();
        assert_eq!(hit.wall, Wall::Top);
    }

    #[test]
    fn test_head_on_closest_approach() {
        let a = Aircraft::new("A1", DVec2::new(390.0, 300.0), 0.0, 53.6);
        let b = Aircraft::new("A2", DVec2::new(510.0, 300.0), PI, 53.6);
        let ap = time_of_closest_approach(&a, &b).unwrap();
        assert!((ap.t_star - 120.0 / 107.2).abs() < 1e-9);
        assert!(ap.d_min < 1e-6);
        assert!(should_trigger_midair(&a, &b, &Params::default()));
    }

    #[test]
    fn test_parallel_tracks_have_no_approach() {
        let a = Aircraft::new("A1", DVec2::new(100.0, 100.0), 0.0, 50.0);
        let b = Aircraft::new("A2", DVec2::new(100.0, 140.0), 0.0, 50.0);
        assert!(time_of_closest_approach(&a, &b).is_none());
    }

    #[test]
    fn test_receding_pair_has_no_approach() {
        let a = Aircraft::new("A1", DVec2::new(100.0, 100.0), PI, 50.0);
        let b = Aircraft::new("A2", DVec2::new(200.0, 100.0), 0.0, 50.0);
        assert!(time_of_closest_approach(&a, &b).is_none());
        assert!(!should_trigger_midair(&a, &b, &Params::default()));
    }

    #[test]
    fn test_midair_thresholds() {
        let params = Params::default();
        // Closing but far away in time
        let a = Aircraft::new("A1", DVec2::new(0.0, 300.0), 0.0, 50.0);
        let b = Aircraft::new("A2", DVec2::new(800.0, 300.0), PI, 50.0);
        assert!(time_of_closest_approach(&a, &b).is_some());
        assert!(!should_trigger_midair(&a, &b, &params));

        // Soon, but passing wide
        let c = Aircraft::new("A3", DVec2::new(100.0, 300.0), 0.0, 50.0);
        let d = Aircraft::new("A4", DVec2::new(200.0, 400.0), PI, 50.0);
        let ap = time_of_closest_approach(&c, &d).unwrap();
        assert!(ap.d_min > params.mid_sep_trigger);
        assert!(!should_trigger_midair(&c, &d, &params));
    }

    #[test]
    fn test_pick_turn_direction_tie_goes_left() {
        // Zero horizon: both directions report the same (unbounded) clearance
        let params = Params {
            horizon_s: 0.0,
            ..Default::default()
        };
        let a = Aircraft::new("A1", DVec2::new(390.0, 300.0), 0.0, 53.6);
        let b = Aircraft::new("A2", DVec2::new(510.0, 300.0), PI, 53.6);
        let pick = pick_turn_direction(&a, &b, 4.5, &params);
        assert_eq!(pick.direction, TurnDirection::Left);
    }

    #[test]
    fn test_pick_turn_direction_head_on_clearance() {
        let a = Aircraft::new("A1", DVec2::new(390.0, 300.0), 0.0, 53.6);
        let b = Aircraft::new("A2", DVec2::new(510.0, 300.0), PI, 53.6);
        let pick = pick_turn_direction(&a, &b, 4.5, &Params::default());
        // One-sided avoidance at 4.5 g still opens the pass well beyond contact
        assert!(pick.min_sep > 20.0, "min_sep {}", pick.min_sep);
    }

    #[test]
    fn test_pick_turn_direction_turns_away_from_offset_intruder() {
        // Intruder slightly to the left (+y) of the nose: turning right opens more
        let a = Aircraft::new("A1", DVec2::new(300.0, 300.0), 0.0, 53.6);
        let b = Aircraft::new("A2", DVec2::new(420.0, 315.0), PI, 53.6);
        let pick = pick_turn_direction(&a, &b, 3.0, &Params::default());
        assert_eq!(pick.direction, TurnDirection::Right);
        assert!(pick.min_sep > 0.0);
    }

    #[test]
    fn test_nearest_intruder_excludes_self() {
        let roster = vec![
            Aircraft::new("A1", DVec2::new(0.0, 0.0), 0.0, 50.0),
            Aircraft::new("A2", DVec2::new(100.0, 0.0), 0.0, 50.0),
            Aircraft::new("A3", DVec2::new(30.0, 40.0), 0.0, 50.0),
        ];
        let nearest = nearest_intruder(&roster[0], &roster).unwrap();
        assert_eq!(nearest.id, "A3");
        let alone = vec![roster[0].clone()];
        assert!(nearest_intruder(&alone[0], &alone).is_none());
    }

    #[test]
    fn test_inbound_unit_vector() {
        let arena = arena();
        let a = Aircraft::new("A1", DVec2::new(-30.0, 300.0), PI, 50.0);
        let v = inbound_unit_vector(&a, &arena);
        assert!((v - DVec2::X).length() < 1e-12);

        let corner = Aircraft::new("A2", DVec2::new(910.0, 610.0), 0.0, 50.0);
        let v = inbound_unit_vector(&corner, &arena);
        let expected = DVec2::new(-1.0, -1.0).normalize();
        assert!((v - expected).length() < 1e-12);
    }

    #[test]
    fn test_separation_rate_sign() {
        let a = Aircraft::new("A1", DVec2::new(0.0, 0.0), 0.0, 10.0);
        let closing = Aircraft::new("A2", DVec2::new(100.0, 0.0), PI, 10.0);
        assert!((separation_rate(&a, &closing) + 20.0).abs() < 1e-9);
        assert!((closure_speed(&a, &closing) - 20.0).abs() < 1e-9);

        let opening = Aircraft::new("A3", DVec2::new(100.0, 0.0), 0.0, 30.0);
        assert!((separation_rate(&a, &opening) - 20.0).abs() < 1e-9);
        assert_eq!(closure_speed(&a, &opening), 0.0);
    }
}
