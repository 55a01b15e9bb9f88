//! Real-time driver
//!
//! Owns the authoritative roster and advances it one variable-length frame
//! at a time. Each tick runs the shared passes on a working copy, records
//! metrics, checks for collision, then commits the copy.

use glam::DVec2;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use super::passes::{
    Slot, StepContext, behavior_pass, cleanup_pass, guardrail_pass, pair_distances, pair_names,
    trigger_phase,
};
use super::state::{Aircraft, Arena, ControllerKind, spawn_roster};
use super::telemetry::{
    CollisionReport, EventLog, LogSource, PairDistanceRow, SeriesBuffer, SeriesRow, SimLogRow,
    TriggerLogRow, TriggerSink, round_to,
};
use crate::consts::*;
use crate::error::SimError;
use crate::index_pairs;
use crate::params::Params;
use crate::score::{ScoreOptions, ScoreTask};

/// Real-time driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub arena: Arena,
    pub max_aircraft: usize,
    pub initial_aircraft: usize,
    pub seed: u64,
    /// Start (and reset) in the paused state
    pub start_paused: bool,
    /// Pair separation that ends the run (m)
    pub collision_threshold: f64,
    /// Seconds of history included in a collision report
    pub collision_window_s: f64,
    /// Minimum spacing between chart rows (s)
    pub history_dt: f64,
    /// Chart history retained (s)
    pub history_seconds: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            arena: Arena::default(),
            max_aircraft: DEFAULT_MAX_AIRCRAFT,
            initial_aircraft: DEFAULT_INITIAL_AIRCRAFT,
            seed: 1,
            start_paused: true,
            collision_threshold: RT_COLLISION_THRESHOLD,
            collision_window_s: COLLISION_WINDOW_S,
            history_dt: HISTORY_DT,
            history_seconds: HISTORY_SECONDS,
        }
    }
}

impl SimConfig {
    fn history_capacity(&self) -> usize {
        (self.history_seconds / self.history_dt.max(EPSILON)).round().max(1.0) as usize
    }
}

/// Render-facing copy of one aircraft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftSnapshot {
    pub id: String,
    pub pos: DVec2,
    pub vel: DVec2,
    pub speed: f64,
    pub active: ControllerKind,
}

impl From<&Aircraft> for AircraftSnapshot {
    fn from(a: &Aircraft) -> Self {
        Self {
            id: a.id.clone(),
            pos: a.pos,
            vel: a.vel,
            speed: a.speed,
            active: a.active_controller().kind(),
        }
    }
}

/// Interactive simulation state
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimConfig,
    params: Params,
    aircraft: Vec<Aircraft>,
    time: f64,
    running: bool,
    rng: Pcg32,
    log: EventLog,
    pair_history: SeriesBuffer,
    center_history: SeriesBuffer,
    last_history_t: f64,
    collision: Option<CollisionReport>,
}

impl Simulation {
    /// Seeded simulation with `config.initial_aircraft` random aircraft
    pub fn new(config: SimConfig, params: Params) -> Self {
        let rng = Pcg32::seed_from_u64(config.seed);
        let mut sim = Self::empty(config, params, rng);
        sim.reset(sim.config.initial_aircraft);
        sim
    }

    /// Simulation over a hand-built roster (scenarios and tests)
    pub fn from_aircraft(config: SimConfig, params: Params, roster: Vec<Aircraft>) -> Self {
        let rng = Pcg32::seed_from_u64(config.seed);
        let mut sim = Self::empty(config, params, rng);
        sim.install(roster);
        sim
    }

    fn empty(config: SimConfig, params: Params, rng: Pcg32) -> Self {
        let capacity = config.history_capacity();
        Self {
            running: !config.start_paused,
            config,
            params,
            aircraft: Vec::new(),
            time: 0.0,
            rng,
            log: EventLog::default(),
            pair_history: SeriesBuffer::new(Vec::new(), capacity),
            center_history: SeriesBuffer::new(Vec::new(), capacity),
            last_history_t: 0.0,
            collision: None,
        }
    }

    /// Replace the roster and clear every log, timer and latch
    fn install(&mut self, roster: Vec<Aircraft>) {
        let names = pair_names(&roster);
        let ids = roster.iter().map(|a| a.id.clone()).collect();
        self.log = EventLog::new(names.clone());
        self.pair_history.clear(names);
        self.center_history.clear(ids);
        self.aircraft = roster;
        self.time = 0.0;
        self.last_history_t = 0.0;
        self.collision = None;
    }

    /// Fresh random roster of `count` aircraft (clamped), ids from `A1`
    pub fn reset(&mut self, count: usize) {
        let count = count.clamp(MIN_AIRCRAFT, self.config.max_aircraft.max(MIN_AIRCRAFT));
        let roster = spawn_roster(count, 1, &self.config.arena, &mut self.rng);
        self.install(roster);
        self.running = !self.config.start_paused;
        log::info!("Reset with {count} aircraft");
    }

    pub fn reset_and_start(&mut self, count: usize) {
        self.reset(count);
        self.running = true;
    }

    /// Respawn with one more aircraft, keeping the run state
    pub fn add_aircraft(&mut self) {
        self.resize(self.aircraft.len() + 1);
    }

    /// Respawn with one fewer aircraft, keeping the run state
    pub fn remove_aircraft(&mut self) {
        self.resize(self.aircraft.len().saturating_sub(1));
    }

    fn resize(&mut self, count: usize) {
        let running = self.running;
        self.reset(count);
        self.running = running;
    }

    /// Start or pause. Starting is refused while a collision is latched.
    pub fn set_running(&mut self, running: bool) {
        if running && self.collision.is_some() {
            log::warn!("Collision latched; reset before resuming");
            return;
        }
        self.running = running;
    }

    pub fn toggle_running(&mut self) {
        self.set_running(!self.running);
    }

    /// Swap parameters; takes effect on the next tick
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Advance by a wall-clock frame delta, clamped to [0, 0.06] s
    pub fn frame(&mut self, elapsed: f64) {
        if !elapsed.is_finite() {
            return;
        }
        self.tick(elapsed.clamp(0.0, MAX_FRAME_DT));
    }

    /// Advance the simulation by `dt` seconds
    pub fn tick(&mut self, dt: f64) {
        if !self.running {
            return;
        }

        let now = self.time;
        let mut roster = self.aircraft.clone();
        let ctx = StepContext {
            arena: &self.config.arena,
            params: &self.params,
            now,
        };

        trigger_phase(&mut roster, &ctx, &mut self.log);
        behavior_pass(&mut roster, &ctx, dt, Some(&mut self.rng), &mut self.log);
        guardrail_pass(&mut roster, &ctx, dt, &mut self.log);
        cleanup_pass(&mut roster, &ctx, &mut self.log);

        let t = now + dt;
        let distances = pair_distances(&roster);
        self.record_metrics(&roster, t, &distances);

        self.aircraft = roster;
        self.time = t;

        let closest = distances
            .iter()
            .copied()
            .enumerate()
            .min_by(|x, y| x.1.total_cmp(&y.1));
        if let Some((pair, min_sep)) = closest {
            if min_sep < self.config.collision_threshold {
                self.latch_collision(pair, min_sep);
            }
        }
    }

    fn record_metrics(&mut self, roster: &[Aircraft], t: f64, distances: &[f64]) {
        self.log.sim.extend(roster.iter().map(|a| SimLogRow {
            t,
            aircraft_id: a.id.clone(),
            x: a.pos.x,
            y: a.pos.y,
            vx: a.vel.x,
            vy: a.vel.y,
            speed: a.speed,
            active: a.active_controller().kind(),
        }));
        self.log.pairs.push(PairDistanceRow {
            t,
            active_triggers: active_triggers(roster),
            distances: distances.to_vec(),
        });

        if t - self.last_history_t < self.config.history_dt {
            return;
        }
        self.last_history_t = t;
        let row_t = round_to(t, 2);
        self.pair_history.push(SeriesRow {
            t: row_t,
            values: distances.iter().map(|d| round_to(*d, 1)).collect(),
        });
        let center = self.config.arena.center();
        self.center_history.push(SeriesRow {
            t: row_t,
            values: roster
                .iter()
                .map(|a| round_to(a.pos.distance(center), 1))
                .collect(),
        });
    }

    fn latch_collision(&mut self, pair_idx: usize, min_sep: f64) {
        let t = self.time;
        let pair = self.log.pair_names.get(pair_idx).cloned().unwrap_or_default();
        let first = index_pairs(self.aircraft.len())
            .nth(pair_idx)
            .map(|(i, _)| self.aircraft[i].id.clone())
            .unwrap_or_default();
        log::warn!("Collision {pair} at t={t:.3}s, d={min_sep:.2}m");

        self.log.record(TriggerLogRow {
            t,
            aircraft_id: first,
            trigger_id: format!("C{}", (t * 1000.0).floor() as u64),
            source: LogSource::Collision,
            note: format!("pair {pair} d={min_sep:.2}m"),
        });
        self.running = false;
        self.collision = Some(CollisionReport::extract(
            &self.log,
            t,
            &pair,
            min_sep,
            self.config.collision_window_s,
            self.config.arena,
        ));
    }

    pub fn aircraft(&self) -> &[Aircraft] {
        &self.aircraft
    }

    pub fn snapshot(&self) -> Vec<AircraftSnapshot> {
        self.aircraft.iter().map(AircraftSnapshot::from).collect()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn trigger_log(&self) -> &[TriggerLogRow] {
        &self.log.triggers
    }

    /// Newest-first trigger rows, at most `limit` (and never more than the view cap)
    pub fn recent_triggers(&self, limit: usize) -> impl Iterator<Item = &TriggerLogRow> {
        self.log.recent_triggers(limit.min(TRIGGER_VIEW_LEN))
    }

    pub fn pair_names(&self) -> &[String] {
        &self.log.pair_names
    }

    /// Throttled pairwise separations keyed by pair name
    pub fn pair_history(&self) -> &SeriesBuffer {
        &self.pair_history
    }

    /// Throttled distance from the arena center keyed by aircraft id
    pub fn center_history(&self) -> &SeriesBuffer {
        &self.center_history
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Report of the latched collision, if any
    pub fn collision(&self) -> Option<&CollisionReport> {
        self.collision.as_ref()
    }

    /// Score the current parameters on a background thread
    pub fn spawn_score(&self, options: ScoreOptions) -> Result<ScoreTask, SimError> {
        ScoreTask::spawn(self.params.clone(), options)
    }
}

/// Sorted `trigger:slot:aircraft` labels of every armed trigger, joined by `|`
fn active_triggers(roster: &[Aircraft]) -> String {
    let mut labels: Vec<String> = roster
        .iter()
        .flat_map(|a| {
            Slot::ALL.into_iter().filter_map(move |slot| {
                let id = slot.of(a).as_ref()?.trigger_id()?;
                Some(format!("{id}:{}:{}", slot.as_str(), a.id))
            })
        })
        .collect();
    labels.sort();
    labels.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::state::{ArcTurn, Controller, TriggerSource, TurnDirection};
    use std::f64::consts::PI;

    fn running_config() -> SimConfig {
        SimConfig {
            start_paused: false,
            ..Default::default()
        }
    }

    fn head_on(params: Params, gap: f64) -> Simulation {
        let roster = vec![
            Aircraft::new("A1", DVec2::new(450.0 - gap / 2.0, 300.0), 0.0, 53.6),
            Aircraft::new("A2", DVec2::new(450.0 + gap / 2.0, 300.0), PI, 53.6),
        ];
        Simulation::from_aircraft(running_config(), params, roster)
    }

    #[test]
    fn test_new_starts_paused_with_initial_roster() {
        let mut sim = Simulation::new(SimConfig::default(), Params::default());
        assert!(!sim.is_running());
        let ids: Vec<_> = sim.aircraft().iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec!["A1", "A2", "A3", "A4", "A5"]);
        assert_eq!(sim.pair_names().len(), 10);
        assert_eq!(sim.pair_names()[0], "A1-A2");

        sim.tick(0.05);
        assert_eq!(sim.time(), 0.0);
    }

    #[test]
    fn test_head_on_avoided() {
        let mut sim = head_on(Params::default(), 120.0);
        let mut min_sep = f64::INFINITY;
        for _ in 0..200 {
            sim.tick(0.05);
            let d = sim.aircraft()[0].pos.distance(sim.aircraft()[1].pos);
            min_sep = min_sep.min(d);
        }
        assert!(sim.collision().is_none());
        assert!(min_sep >= 20.0, "min separation {min_sep}");

        let first = &sim.trigger_log()[0];
        assert_eq!(first.t, 0.0);
        assert_eq!(first.source, LogSource::Midair);
        assert_eq!(first.trigger_id, "M000000");
        assert!(first.note.contains("tca=1.12"));
    }

    #[test]
    fn test_collision_latches_until_reset() {
        let mut sim = head_on(Params::all_disabled(), 60.0);
        for _ in 0..100 {
            sim.tick(0.05);
        }
        assert!(!sim.is_running());
        let report = sim.collision().expect("collision report");
        assert_eq!(report.meta.collision_pair, "A1-A2");
        assert!(report.meta.min_sep_m < 10.0);
        assert!(!report.sim_log.is_empty());

        let last = sim.trigger_log().last().unwrap();
        assert_eq!(last.source, LogSource::Collision);
        assert!(last.trigger_id.starts_with('C'));
        assert_eq!(last.aircraft_id, "A1");
        assert!(last.note.starts_with("pair A1-A2 "));

        // Frozen while latched
        let t = sim.time();
        sim.set_running(true);
        assert!(!sim.is_running());
        sim.toggle_running();
        sim.tick(0.05);
        assert_eq!(sim.time(), t);

        sim.reset_and_start(2);
        assert!(sim.is_running());
        assert!(sim.collision().is_none());
        assert!(sim.trigger_log().is_empty());
        assert_eq!(sim.time(), 0.0);
    }

    #[test]
    fn test_resize_clamps_and_reassigns_ids() {
        let mut sim = Simulation::new(running_config(), Params::default());
        sim.tick(0.05);
        sim.add_aircraft();
        assert_eq!(sim.aircraft().len(), 6);
        assert_eq!(sim.aircraft()[5].id, "A6");
        assert_eq!(sim.time(), 0.0);
        assert!(sim.is_running());

        for _ in 0..10 {
            sim.add_aircraft();
        }
        assert_eq!(sim.aircraft().len(), DEFAULT_MAX_AIRCRAFT);
        for _ in 0..10 {
            sim.remove_aircraft();
        }
        assert_eq!(sim.aircraft().len(), MIN_AIRCRAFT);
        assert_eq!(sim.pair_names(), &["A1-A2".to_string()]);
        assert_eq!(sim.center_history().keys, vec!["A1", "A2"]);
    }

    #[test]
    fn test_history_is_throttled() {
        let config = SimConfig {
            collision_threshold: 0.0,
            ..running_config()
        };
        let mut sim = Simulation::new(config, Params::all_disabled());
        for _ in 0..20 {
            sim.tick(0.05);
        }
        // Every tick is logged, chart rows only every other tick starting at 0.1
        assert_eq!(sim.event_log().pairs.len(), 20);
        assert_eq!(sim.event_log().sim.len(), 20 * 5);
        assert_eq!(sim.pair_history().len(), 10);
        assert_eq!(sim.center_history().len(), 10);
        assert_eq!(sim.pair_history().capacity(), 1500);

        let first = sim.pair_history().rows.front().unwrap();
        assert_eq!(first.t, 0.1);
        assert_eq!(first.values.len(), 10);
    }

    #[test]
    fn test_frame_clamps_delta() {
        let mut sim = Simulation::new(running_config(), Params::default());
        sim.frame(1.0);
        assert!((sim.time() - MAX_FRAME_DT).abs() < 1e-12);
        sim.frame(-0.5);
        assert!((sim.time() - MAX_FRAME_DT).abs() < 1e-12);
        sim.frame(f64::NAN);
        assert!((sim.time() - MAX_FRAME_DT).abs() < 1e-12);
    }

    #[test]
    fn test_guardrail_clears_override_same_tick() {
        let mut a = Aircraft::new("A1", DVec2::new(400.0, 300.0), PI, 53.6);
        a.overrides.midair = Some(Controller::ArcTurn(ArcTurn::new(
            TurnDirection::Left,
            2.0,
            TriggerSource::Midair,
            Some("M000000".into()),
        )));
        a.open_time = 0.48;
        let b = Aircraft::new("A2", DVec2::new(500.0, 300.0), 0.0, 53.6);
        let mut sim = Simulation::from_aircraft(running_config(), Params::default(), vec![a, b]);

        sim.tick(0.05);
        assert!(sim.aircraft()[0].overrides.midair.is_none());
        assert_eq!(sim.snapshot()[0].active, ControllerKind::NormalMotion);
        assert!(sim
            .trigger_log()
            .iter()
            .any(|r| r.note.starts_with("early-exit")));
    }

    #[test]
    fn test_active_triggers_label() {
        let mut sim = head_on(Params::default(), 120.0);
        sim.tick(0.05);
        let row = &sim.event_log().pairs[0];
        assert_eq!(row.active_triggers, "M000000:midair:A1|M000000:midair:A2");
    }

    #[test]
    fn test_recent_triggers_view() {
        let mut sim = head_on(Params::default(), 120.0);
        sim.tick(0.05);
        let recent: Vec<_> = sim.recent_triggers(1).collect();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].aircraft_id, "A2");
    }

    #[test]
    fn test_set_params_applies_next_tick() {
        let mut sim = head_on(Params::default(), 120.0);
        sim.set_params(Params::all_disabled());
        sim.tick(0.05);
        assert!(sim.trigger_log().is_empty());
        assert!(!sim.params().enable_midair);
    }
}
