//! Monte Carlo risk scoring
//!
//! Flies many independent seeded airparks with an adaptive timestep and
//! condenses them into a collision rate and a ten-year risk figure. Seeds
//! fan out over rayon; per-seed stats are merged in seed order so a run is
//! reproducible regardless of thread scheduling.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use rand::SeedableRng;
use rand_pcg::Pcg32;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::SimError;
use crate::index_pairs;
use crate::params::Params;
use crate::sim::passes::{
    StepContext, behavior_pass, cleanup_pass, guardrail_pass, trigger_phase,
};
use crate::sim::predictors::{time_of_closest_approach, turn_rate, wall_time_to_collision};
use crate::sim::state::{Aircraft, Arena, Controller, spawn_roster};
use crate::sim::telemetry::NullSink;

/// Batch run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreOptions {
    pub seeds: u32,
    /// Simulated minutes per seed
    pub minutes: f64,
    pub aircraft: usize,
    pub dt_max: f64,
    pub dt_min: f64,
    /// Pair separation counted as a near miss (m)
    pub near_miss: f64,
    /// Pair separation counted as a collision (m)
    pub collision_radius: f64,
    /// Seed `s` runs with RNG seed `base_seed + s`
    pub base_seed: u64,
    pub arena: Arena,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self {
            seeds: 64,
            minutes: 2.0,
            aircraft: DEFAULT_MAX_AIRCRAFT,
            dt_max: BATCH_DT_MAX,
            dt_min: BATCH_DT_MIN,
            near_miss: BATCH_NEAR_MISS,
            collision_radius: BATCH_COLLISION_RADIUS,
            base_seed: 1,
            arena: Arena::default(),
        }
    }
}

impl ScoreOptions {
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.dt_min > 0.0 && self.dt_max >= self.dt_min && self.dt_max.is_finite()) {
            return Err(SimError::InvalidParams(format!(
                "timestep bounds must satisfy 0 < dt_min <= dt_max (got {} / {})",
                self.dt_min, self.dt_max
            )));
        }
        if !(self.minutes >= 0.0 && self.minutes.is_finite()) {
            return Err(SimError::InvalidParams(format!(
                "minutes must be finite and non-negative (got {})",
                self.minutes
            )));
        }
        Ok(())
    }

    pub fn exposure_hours(&self) -> f64 {
        self.seeds as f64 * self.minutes / 60.0
    }
}

/// Aggregate result of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Pair-steps below the collision radius
    pub collisions: u64,
    /// Simulated park-hours
    pub exposure_hours: f64,
    pub lambda_per_hour: f64,
    /// `1 - exp(-λ · 87600)`
    pub ten_year_risk: f64,
    /// Pair-steps below the near-miss distance but outside the collision radius
    pub near_misses: u64,
    /// Mean pair separation over every step (m)
    pub avg_sep: f64,
    /// Share of aircraft-time spent under an avoidance override
    pub system_frac: f64,
}

impl ScoreRecord {
    fn from_stats(stats: &SeedStats, exposure_hours: f64) -> Self {
        let lambda_per_hour = stats.collisions as f64 / exposure_hours.max(EPSILON);
        Self {
            collisions: stats.collisions,
            exposure_hours,
            lambda_per_hour,
            ten_year_risk: 1.0 - (-lambda_per_hour * HOURS_PER_DECADE).exp(),
            near_misses: stats.near_misses,
            avg_sep: if stats.sep_count > 0 {
                stats.sep_sum / stats.sep_count as f64
            } else {
                0.0
            },
            system_frac: if stats.total_time > 0.0 {
                stats.system_time / stats.total_time
            } else {
                0.0
            },
        }
    }
}

/// Raw counters of one or more seeds
#[derive(Debug, Clone, Default, PartialEq)]
struct SeedStats {
    collisions: u64,
    near_misses: u64,
    sep_sum: f64,
    sep_count: u64,
    system_time: f64,
    total_time: f64,
}

impl SeedStats {
    fn merge(mut self, other: &SeedStats) -> Self {
        self.collisions += other.collisions;
        self.near_misses += other.near_misses;
        self.sep_sum += other.sep_sum;
        self.sep_count += other.sep_count;
        self.system_time += other.system_time;
        self.total_time += other.total_time;
        self
    }

    fn observe(&mut self, roster: &[Aircraft], dt: f64, options: &ScoreOptions) {
        for (i, j) in index_pairs(roster.len()) {
            let d = roster[i].pos.distance(roster[j].pos);
            if d < options.collision_radius {
                self.collisions += 1;
            } else if d < options.near_miss {
                self.near_misses += 1;
            }
            self.sep_sum += d;
            self.sep_count += 1;
        }
        let under_override = roster.iter().filter(|a| a.has_override()).count();
        self.system_time += under_override as f64 * dt;
        self.total_time += roster.len() as f64 * dt;
    }
}

/// Time until the next thing worth resolving finely
fn next_event(roster: &[Aircraft], params: &Params, options: &ScoreOptions) -> f64 {
    let mut next = BATCH_IDLE_HORIZON_S;

    for a in roster {
        if let Some(hit) = wall_time_to_collision(a, &options.arena) {
            next = next.min(hit.time);
        }
    }
    for (i, j) in index_pairs(roster.len()) {
        if let Some(approach) = time_of_closest_approach(&roster[i], &roster[j]) {
            next = next.min(approach.t_star);
        }
    }
    for a in roster {
        if let Controller::ArcTurn(arc) = a.active_controller() {
            next = next.min(arc.remaining_angle() / turn_rate(arc.g_limit, a.speed).max(EPSILON));
        }
    }

    // Out-of-bounds return due to arm within the next step
    let oob_arming = params.enable_oob_return
        && roster.iter().any(|a| {
            options.arena.is_out_of_bounds(a.pos)
                && a.oob_time + options.dt_max >= params.oob_return_after
        });
    if oob_arming {
        next = next.min(BATCH_OOB_HORIZON_S);
    }
    next
}

fn run_seed(
    params: &Params,
    options: &ScoreOptions,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<SeedStats, SimError> {
    let mut rng = Pcg32::seed_from_u64(options.base_seed.wrapping_add(seed));
    let mut roster = spawn_roster(options.aircraft, 1, &options.arena, &mut rng);
    let duration = options.minutes * 60.0;
    let mut stats = SeedStats::default();
    let mut t = 0.0;

    while t < duration {
        if cancel.load(Ordering::Relaxed) {
            return Err(SimError::Cancelled);
        }
        let dt = batch_step(&mut roster, params, options, t);
        stats.observe(&roster, dt, options);
        t += dt;
    }
    Ok(stats)
}

/// Advance the roster by one adaptive step starting at `now`; returns the step taken
fn batch_step(roster: &mut [Aircraft], params: &Params, options: &ScoreOptions, now: f64) -> f64 {
    let ctx = StepContext {
        arena: &options.arena,
        params,
        now,
    };

    trigger_phase(roster, &ctx, &mut NullSink);
    let dt = (BATCH_EVENT_FRACTION * next_event(roster, params, options))
        .clamp(options.dt_min, options.dt_max);
    behavior_pass(roster, &ctx, dt, None::<&mut Pcg32>, &mut NullSink);
    guardrail_pass(roster, &ctx, dt, &mut NullSink);
    cleanup_pass(roster, &ctx, &mut NullSink);
    dt
}

/// Score `params` over `options.seeds` independent airparks
pub fn score_params(
    params: &Params,
    options: &ScoreOptions,
    cancel: &AtomicBool,
) -> Result<ScoreRecord, SimError> {
    score_params_with_progress(params, options, cancel, &AtomicUsize::new(0))
}

/// [`score_params`] that bumps `seeds_done` as each seed finishes
pub fn score_params_with_progress(
    params: &Params,
    options: &ScoreOptions,
    cancel: &AtomicBool,
    seeds_done: &AtomicUsize,
) -> Result<ScoreRecord, SimError> {
    options.validate()?;

    let per_seed: Vec<SeedStats> = (0..options.seeds)
        .into_par_iter()
        .map(|seed| -> Result<SeedStats, SimError> {
            let stats = run_seed(params, options, u64::from(seed), cancel)?;
            seeds_done.fetch_add(1, Ordering::Relaxed);
            Ok(stats)
        })
        .collect::<Result<_, SimError>>()?;

    let total = per_seed
        .iter()
        .fold(SeedStats::default(), |acc, s| acc.merge(s));
    Ok(ScoreRecord::from_stats(&total, options.exposure_hours()))
}

type ResultSlot = Arc<Mutex<Option<Result<ScoreRecord, SimError>>>>;

/// Batch scorer running on a background thread
///
/// Dropping the task cancels the run and joins the worker.
pub struct ScoreTask {
    cancel: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    seeds_done: Arc<AtomicUsize>,
    seeds_total: usize,
    result: ResultSlot,
    handle: Option<thread::JoinHandle<()>>,
}

impl ScoreTask {
    pub fn spawn(params: Params, options: ScoreOptions) -> Result<Self, SimError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(true));
        let seeds_done = Arc::new(AtomicUsize::new(0));
        let result: ResultSlot = Arc::new(Mutex::new(None));
        let seeds_total = options.seeds as usize;

        let worker_cancel = Arc::clone(&cancel);
        let worker_busy = Arc::clone(&busy);
        let worker_done = Arc::clone(&seeds_done);
        let worker_result = Arc::clone(&result);
        let handle = thread::Builder::new()
            .name("airpark-score-worker".into())
            .spawn(move || {
                log::info!(
                    "Scoring {} seeds x {} min, {} aircraft",
                    options.seeds,
                    options.minutes,
                    options.aircraft
                );
                let outcome =
                    score_params_with_progress(&params, &options, &worker_cancel, &worker_done);
                match &outcome {
                    Ok(record) => log::info!(
                        "Score done: {} collisions, lambda {:.3}/h",
                        record.collisions,
                        record.lambda_per_hour
                    ),
                    Err(err) => log::info!("Score stopped: {err}"),
                }
                *worker_result.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
                worker_busy.store(false, Ordering::Release);
            })
            .map_err(|err| SimError::Worker(format!("failed to spawn score worker thread: {err}")))?;

        Ok(Self {
            cancel,
            busy,
            seeds_done,
            seeds_total,
            result,
            handle: Some(handle),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Ask the worker to stop at its next step
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Seeds finished so far and seeds requested
    pub fn progress(&self) -> (usize, usize) {
        (self.seeds_done.load(Ordering::Relaxed), self.seeds_total)
    }

    /// The outcome once the worker has finished; `None` while busy or after it was taken
    pub fn take_result(&self) -> Option<Result<ScoreRecord, SimError>> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Block until the worker finishes and return its outcome
    pub fn wait(mut self) -> Result<ScoreRecord, SimError> {
        self.join()?;
        self.take_result()
            .unwrap_or_else(|| Err(SimError::Worker("score result already taken".into())))
    }

    fn join(&mut self) -> Result<(), SimError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SimError::Worker("score worker thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for ScoreTask {
    fn drop(&mut self) {
        self.cancel();
        if let Err(err) = self.join() {
            log::error!("{err}");
        }
    }
}
