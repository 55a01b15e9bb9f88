//! Airpark entry point
//!
//! Headless front end: run the real-time driver, score parameters in the
//! background, or dump the default parameters.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use airpark::consts::*;
use airpark::{Params, ScoreOptions, ScoreTask, SimConfig, SimError, Simulation};

#[derive(Parser)]
#[command(name = "airpark", about = "Predictive collision-avoidance airpark")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fly the real-time simulation headless
    Run {
        /// Number of aircraft
        #[arg(long, default_value_t = DEFAULT_INITIAL_AIRCRAFT)]
        aircraft: usize,

        /// Seed for spawn positions and pilot jitter
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Simulated seconds to fly
        #[arg(long, default_value_t = 120.0)]
        duration: f64,

        /// Frame rate
        #[arg(long, default_value_t = 60.0)]
        hz: f64,

        /// Parameter file (JSON, partial allowed)
        #[arg(long)]
        params: Option<PathBuf>,

        /// Pace frames to wall-clock time
        #[arg(long)]
        realtime: bool,

        /// Where collision reports are written
        #[arg(long, default_value = ".")]
        packet_dir: PathBuf,
    },

    /// Score parameters over many seeded airparks
    Score {
        #[arg(long, default_value_t = 64)]
        seeds: u32,

        /// Simulated minutes per seed
        #[arg(long, default_value_t = 2.0)]
        minutes: f64,

        #[arg(long, default_value_t = DEFAULT_MAX_AIRCRAFT)]
        aircraft: usize,

        /// Near-miss distance (m)
        #[arg(long, default_value_t = BATCH_NEAR_MISS)]
        near_miss: f64,

        /// Parameter file (JSON, partial allowed)
        #[arg(long)]
        params: Option<PathBuf>,

        /// Base seed
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },

    /// Print the default parameters as JSON
    Defaults,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run {
            aircraft,
            seed,
            duration,
            hz,
            params,
            realtime,
            packet_dir,
        } => load_params(params.as_deref()).and_then(|params| {
            let config = SimConfig {
                initial_aircraft: aircraft,
                seed,
                start_paused: false,
                ..Default::default()
            };
            cmd_run(config, params, duration, hz, realtime, &packet_dir)
        }),

        Commands::Score {
            seeds,
            minutes,
            aircraft,
            near_miss,
            params,
            seed,
        } => load_params(params.as_deref()).and_then(|params| {
            let options = ScoreOptions {
                seeds,
                minutes,
                aircraft,
                near_miss,
                base_seed: seed,
                ..Default::default()
            };
            cmd_score(params, options)
        }),

        Commands::Defaults => cmd_defaults(),
    };

    if let Err(err) = outcome {
        log::error!("{err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn load_params(path: Option<&Path>) -> Result<Params, SimError> {
    let params = match path {
        Some(path) => Params::load(path)?,
        None => Params::default(),
    };
    params.validate()?;
    Ok(params)
}

fn cmd_run(
    config: SimConfig,
    params: Params,
    duration: f64,
    hz: f64,
    realtime: bool,
    packet_dir: &Path,
) -> Result<(), SimError> {
    let frame_dt = 1.0 / hz.max(1.0);
    let mut sim = Simulation::new(config, params);
    log::info!(
        "Airpark starting: {} aircraft, {:.0} s at {:.0} Hz",
        sim.aircraft().len(),
        duration,
        hz
    );

    let mut last_status = 0.0;
    while sim.is_running() && sim.time() < duration {
        let started = Instant::now();
        sim.frame(frame_dt);

        if sim.time() - last_status >= 10.0 {
            last_status = sim.time();
            let armed = sim.aircraft().iter().filter(|a| a.has_override()).count();
            log::info!(
                "t={:.1}s triggers={} armed={}",
                sim.time(),
                sim.trigger_log().len(),
                armed
            );
        }

        if realtime {
            let budget = Duration::from_secs_f64(frame_dt);
            thread::sleep(budget.saturating_sub(started.elapsed()));
        }
    }

    if let Some(report) = sim.collision() {
        std::fs::create_dir_all(packet_dir)?;
        let path = packet_dir.join(report.file_name());
        std::fs::write(&path, report.to_json()?)?;
        log::warn!("Collision report written to {}", path.display());
    }

    let summary = serde_json::json!({
        "time_s": sim.time(),
        "aircraft": sim.aircraft().len(),
        "triggers": sim.trigger_log().len(),
        "collision": sim.collision().map(|r| &r.meta),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_score(params: Params, options: ScoreOptions) -> Result<(), SimError> {
    let task = ScoreTask::spawn(params, options)?;

    let mut reported = 0;
    while task.is_busy() {
        thread::sleep(Duration::from_millis(250));
        let (done, total) = task.progress();
        if done != reported {
            reported = done;
            log::info!("Scored {done}/{total} seeds");
        }
    }

    let record = task.wait()?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_defaults() -> Result<(), SimError> {
    println!("{}", serde_json::to_string_pretty(&Params::default())?);
    Ok(())
}
