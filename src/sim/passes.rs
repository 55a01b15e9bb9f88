//! Per-step passes shared by the real-time driver and the batch scorer
//!
//! Order within a step: triggers, behavior (jitter, out-of-bounds return,
//! integration, release), guardrail, cleanup/retrigger. Every pass works on
//! a mutable roster slice and reports trigger events through a
//! [`TriggerSink`].

use rand::Rng;

use super::controller::integrate;
use super::predictors::{
    closure_speed, inbound_unit_vector, midair_conflict, nearest_intruder, pick_turn_direction,
    separation_rate, wall_time_to_collision,
};
use super::state::{
    Aircraft, ArcTurn, Arena, Controller, ReturnToBox, TriggerSource, TurnDirection,
};
use super::telemetry::{LogSource, TriggerLogRow, TriggerSink, trigger_id};
use crate::consts::*;
use crate::params::Params;
use crate::{index_pairs, rotate};

/// Read-only inputs of one step
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub arena: &'a Arena,
    pub params: &'a Params,
    /// Simulated time at the start of the step
    pub now: f64,
}

impl StepContext<'_> {
    fn log(
        &self,
        sink: &mut impl TriggerSink,
        aircraft_id: &str,
        trigger_id: String,
        source: LogSource,
        note: String,
    ) {
        sink.record(TriggerLogRow {
            t: self.now,
            aircraft_id: aircraft_id.to_string(),
            trigger_id,
            source,
            note,
        });
    }
}

/// Override slot of an aircraft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Midair,
    Wall,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Midair, Slot::Wall];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Midair => "midair",
            Slot::Wall => "wall",
        }
    }

    pub fn of(self, a: &Aircraft) -> &Option<Controller> {
        match self {
            Slot::Midair => &a.overrides.midair,
            Slot::Wall => &a.overrides.wall,
        }
    }

    fn of_mut(self, a: &mut Aircraft) -> &mut Option<Controller> {
        match self {
            Slot::Midair => &mut a.overrides.midair,
            Slot::Wall => &mut a.overrides.wall,
        }
    }
}

/// Arm a midair arc for `roster[idx]` against its most urgent conflict.
///
/// Picks the qualifying intruder with the smallest time of closest approach,
/// scales g-load by closure rate, and chooses the turn side by shadow test.
pub fn attempt_midair(
    roster: &mut [Aircraft],
    idx: usize,
    ctx: &StepContext,
    sink: &mut impl TriggerSink,
) -> bool {
    let params = ctx.params;
    if !params.enable_midair || roster[idx].midair_arc_active() {
        return false;
    }

    let (arc, intruder_id, note) = {
        let a = &roster[idx];
        let best = roster
            .iter()
            .filter(|b| b.id != a.id)
            .filter_map(|b| midair_conflict(a, b, params).map(|ap| (b, ap)))
            .min_by(|x, y| x.1.t_star.total_cmp(&y.1.t_star));
        let Some((intruder, approach)) = best else {
            return false;
        };

        let closure = closure_speed(a, intruder);
        let g_needed = (params.k_gain * closure / approach.t_star.max(CLOSURE_TAU_S))
            .max(params.g_min)
            .min(params.g_max);
        let pick = pick_turn_direction(a, intruder, g_needed, params);

        let id = trigger_id("M", ctx.now);
        let note = format!(
            "vs {} tca={:.2} dmin={:.1} projMin={:.1}",
            intruder.id, approach.t_star, approach.d_min, pick.min_sep
        );
        let arc = ArcTurn::new(pick.direction, g_needed, TriggerSource::Midair, Some(id));
        (arc, intruder.id.clone(), note)
    };

    let a = &mut roster[idx];
    log::debug!(
        "{} midair arc vs {} at {:.1} g ({:?})",
        a.id,
        intruder_id,
        arc.g_limit,
        arc.direction
    );
    let id = arc.trigger_id.clone().unwrap_or_default();
    a.overrides.midair = Some(Controller::ArcTurn(arc));
    a.open_time = 0.0;
    ctx.log(sink, &a.id, id, LogSource::Midair, note);
    true
}

/// Arm a wall arc when a boundary crossing is imminent or the aircraft hugs an edge
pub fn attempt_wall(a: &mut Aircraft, ctx: &StepContext, sink: &mut impl TriggerSink) -> bool {
    let params = ctx.params;
    if !params.enable_wall || a.overrides.wall.is_some() || a.midair_arc_active() {
        return false;
    }
    let Some(hit) = wall_time_to_collision(a, ctx.arena) else {
        return false;
    };

    let edge = ctx.arena.edge_distance(a.pos);
    if hit.time >= params.wall_ttc_threshold && edge >= params.wall_padding + WALL_PADDING_SLACK {
        return false;
    }

    // Turn toward the side the arena center is on
    let to_center = ctx.arena.center() - a.pos;
    let direction = TurnDirection::from_sign(a.vel.perp_dot(to_center));
    let id = trigger_id("W", ctx.now);
    a.overrides.wall = Some(Controller::ArcTurn(ArcTurn::new(
        direction,
        params.wall_g,
        TriggerSource::Wall,
        Some(id.clone()),
    )));
    ctx.log(sink, &a.id, id, LogSource::Wall, format!("ttc~{:.2}", hit.time));
    true
}

/// Trigger phase: at most one new override per aircraft, midair before wall
pub fn trigger_phase(roster: &mut [Aircraft], ctx: &StepContext, sink: &mut impl TriggerSink) {
    for idx in 0..roster.len() {
        if !attempt_midair(roster, idx, ctx, sink) {
            attempt_wall(&mut roster[idx], ctx, sink);
        }
    }
}

/// Arm or refresh ReturnToBox for an aircraft that has been out too long
fn arm_return_to_box(a: &mut Aircraft, ctx: &StepContext, sink: &mut impl TriggerSink) {
    if a.midair_arc_active() {
        return;
    }
    let desired = inbound_unit_vector(a, ctx.arena);
    if let Some(Controller::ReturnToBox(rtb)) = a.overrides.wall.as_mut() {
        rtb.desired = desired;
        return;
    }

    a.overrides.wall = Some(Controller::ReturnToBox(ReturnToBox {
        g_limit: ctx.params.oob_return_g,
        desired,
    }));
    ctx.log(
        sink,
        &a.id,
        trigger_id("RTO", ctx.now),
        LogSource::OobReturn,
        "align to nearest-box-point".into(),
    );
}

/// Behavior pass: pilot jitter, out-of-bounds return, integration, release.
///
/// `jitter` is the pilot RNG; `None` flies the baseline perfectly straight.
pub fn behavior_pass<R: Rng>(
    roster: &mut [Aircraft],
    ctx: &StepContext,
    dt: f64,
    mut jitter: Option<&mut R>,
    sink: &mut impl TriggerSink,
) {
    let params = ctx.params;
    let bump = PILOT_BUMP_DEG.to_radians();

    for a in roster.iter_mut() {
        let cruising = !a.has_override() && a.motion == Controller::NormalMotion;
        if let Some(rng) = jitter.as_deref_mut().filter(|_| cruising) {
            a.bump_timer += dt;
            if a.bump_timer >= PILOT_BUMP_INTERVAL_S {
                a.bump_timer = 0.0;
                let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
                a.vel = rotate(a.heading(), sign * bump) * a.speed;
            }
        }

        let out = ctx.arena.is_out_of_bounds(a.pos);
        a.oob_time = if out { a.oob_time + dt } else { 0.0 };
        if params.enable_oob_return && out && a.oob_time >= params.oob_return_after {
            arm_return_to_box(a, ctx, sink);
        }

        integrate(a, dt);

        if a.return_to_box_active() && ctx.arena.is_inside_margin(a.pos, params.oob_release_margin) {
            a.overrides.wall = None;
            a.motion = Controller::NormalMotion;
            ctx.log(
                sink,
                &a.id,
                "OOB-RELEASE".into(),
                LogSource::OobReturn,
                format!("inside by {}m", params.oob_release_margin),
            );
        }
    }
}

/// Guardrail: end a midair arc early once separation has been opening long enough
pub fn guardrail_pass(
    roster: &mut [Aircraft],
    ctx: &StepContext,
    dt: f64,
    sink: &mut impl TriggerSink,
) {
    let params = ctx.params;
    if !params.enable_guardrail {
        return;
    }

    for idx in 0..roster.len() {
        if !roster[idx].midair_arc_active() {
            continue;
        }
        let Some((rate, sep)) = nearest_intruder(&roster[idx], roster)
            .map(|intr| (separation_rate(&roster[idx], intr), roster[idx].pos.distance(intr.pos)))
        else {
            continue;
        };

        let a = &mut roster[idx];
        a.open_time = if rate > 0.0 { a.open_time + dt } else { 0.0 };
        if sep > params.open_safe_sep && a.open_time >= params.open_hold_s {
            let Some(Controller::ArcTurn(arc)) = a.overrides.midair.as_mut() else {
                continue;
            };
            if arc.done {
                continue;
            }
            arc.done = true;
            let id = arc.trigger_id.clone().unwrap_or_else(|| "M".into());
            ctx.log(
                sink,
                &a.id,
                id,
                LogSource::Midair,
                format!("early-exit open sep={sep:.1}"),
            );
        }
    }
}

/// Cleanup: finished arcs revert to NormalMotion; a finished midair arc
/// re-arms at once if the nearest intruder is still closing inside the safe
/// separation.
pub fn cleanup_pass(roster: &mut [Aircraft], ctx: &StepContext, sink: &mut impl TriggerSink) {
    for idx in 0..roster.len() {
        for slot in Slot::ALL {
            let done = matches!(slot.of(&roster[idx]), Some(Controller::ArcTurn(arc)) if arc.done);
            if !done {
                continue;
            }
            let a = &mut roster[idx];
            *slot.of_mut(a) = None;
            a.motion = Controller::NormalMotion;
            if slot != Slot::Midair {
                continue;
            }
            a.open_time = 0.0;

            let still_closing = nearest_intruder(&roster[idx], roster).is_some_and(|intr| {
                separation_rate(&roster[idx], intr) < 0.0
                    && roster[idx].pos.distance(intr.pos) < ctx.params.open_safe_sep
            });
            if still_closing {
                attempt_midair(roster, idx, ctx, sink);
            }
        }
    }
}

/// Pairwise separations in [`index_pairs`] order
pub fn pair_distances(roster: &[Aircraft]) -> Vec<f64> {
    index_pairs(roster.len())
        .map(|(i, j)| roster[i].pos.distance(roster[j].pos))
        .collect()
}

/// Pair labels `A1-A2`, ... in [`index_pairs`] order
pub fn pair_names(roster: &[Aircraft]) -> Vec<String> {
    index_pairs(roster.len())
        .map(|(i, j)| format!("{}-{}", roster[i].id, roster[j].id))
        .collect()
}
