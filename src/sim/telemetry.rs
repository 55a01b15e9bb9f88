//! Event logs, throttled time series and collision diagnostics
//!
//! The logs only grow during a run; consumers decide how much to show.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::state::{Arena, ControllerKind};

/// Where a trigger row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogSource {
    Midair,
    Wall,
    OobReturn,
    Collision,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Midair => "midair",
            LogSource::Wall => "wall",
            LogSource::OobReturn => "oob-return",
            LogSource::Collision => "collision",
        }
    }
}

/// One trigger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerLogRow {
    pub t: f64,
    pub aircraft_id: String,
    pub trigger_id: String,
    pub source: LogSource,
    pub note: String,
}

/// Receiver for trigger events raised by the shared passes
pub trait TriggerSink {
    fn record(&mut self, row: TriggerLogRow);
}

/// Sink that drops every row (batch scoring)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TriggerSink for NullSink {
    fn record(&mut self, _row: TriggerLogRow) {}
}

impl TriggerSink for Vec<TriggerLogRow> {
    fn record(&mut self, row: TriggerLogRow) {
        self.push(row);
    }
}

/// Trigger id in the `<prefix><ms:06>` form used throughout the logs
pub fn trigger_id(prefix: &str, t: f64) -> String {
    format!("{prefix}{:06}", (t * 1000.0).floor() as u64)
}

/// Per-tick state of one aircraft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimLogRow {
    pub t: f64,
    pub aircraft_id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub speed: f64,
    pub active: ControllerKind,
}

/// Per-tick pairwise separations, in the order of [`EventLog::pair_names`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairDistanceRow {
    pub t: f64,
    /// Sorted `trigger:slot:aircraft` entries joined by `|`
    pub active_triggers: String,
    pub distances: Vec<f64>,
}

/// Append-only tabular logs for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    pub pair_names: Vec<String>,
    pub sim: Vec<SimLogRow>,
    pub pairs: Vec<PairDistanceRow>,
    pub triggers: Vec<TriggerLogRow>,
}

impl EventLog {
    pub fn new(pair_names: Vec<String>) -> Self {
        Self {
            pair_names,
            ..Default::default()
        }
    }

    /// Copy of every row with `t_start <= t <= t_end`
    pub fn window(&self, t_start: f64, t_end: f64) -> EventLog {
        let keep = |t: f64| t.is_finite() && t >= t_start && t <= t_end;
        EventLog {
            pair_names: self.pair_names.clone(),
            sim: self.sim.iter().filter(|r| keep(r.t)).cloned().collect(),
            pairs: self.pairs.iter().filter(|r| keep(r.t)).cloned().collect(),
            triggers: self.triggers.iter().filter(|r| keep(r.t)).cloned().collect(),
        }
    }

    /// Newest-first view of the last `limit` trigger rows
    pub fn recent_triggers(&self, limit: usize) -> impl Iterator<Item = &TriggerLogRow> {
        self.triggers.iter().rev().take(limit)
    }
}

impl TriggerSink for EventLog {
    fn record(&mut self, row: TriggerLogRow) {
        log::debug!(
            "t={:.3} {} {} [{}] {}",
            row.t,
            row.aircraft_id,
            row.trigger_id,
            row.source.as_str(),
            row.note
        );
        self.triggers.push(row);
    }
}

/// One sample of a keyed series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub t: f64,
    pub values: Vec<f64>,
}

/// Fixed-column time series with a row cap (oldest rows drop first)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesBuffer {
    pub keys: Vec<String>,
    pub rows: VecDeque<SeriesRow>,
    capacity: usize,
}

impl SeriesBuffer {
    pub fn new(keys: Vec<String>, capacity: usize) -> Self {
        Self {
            keys,
            rows: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, row: SeriesRow) {
        self.rows.push_back(row);
        while self.rows.len() > self.capacity {
            self.rows.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Value of column `key` in `row`
    pub fn value(&self, row: &SeriesRow, key: &str) -> Option<f64> {
        let idx = self.keys.iter().position(|k| k == key)?;
        row.values.get(idx).copied()
    }

    pub fn clear(&mut self, keys: Vec<String>) {
        self.keys = keys;
        self.rows.clear();
    }
}

/// Round to `places` decimals (chart rows)
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldSize {
    pub width: f64,
    pub height: f64,
}

impl From<Arena> for WorldSize {
    fn from(arena: Arena) -> Self {
        Self {
            width: arena.width,
            height: arena.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionMeta {
    pub collision_time_s: f64,
    pub collision_pair: String,
    pub min_sep_m: f64,
    pub window_s: f64,
    pub world: WorldSize,
}

/// Diagnostic extract emitted when a pair comes within the collision threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionReport {
    pub meta: CollisionMeta,
    pub pair_names: Vec<String>,
    pub sim_log: Vec<SimLogRow>,
    pub pair_distances: Vec<PairDistanceRow>,
    pub trigger_log: Vec<TriggerLogRow>,
}

impl CollisionReport {
    /// Extract the trailing `window_s` seconds of `log` ending at `t`
    pub fn extract(
        log: &EventLog,
        t: f64,
        pair: &str,
        min_sep: f64,
        window_s: f64,
        arena: Arena,
    ) -> Self {
        let window = log.window((t - window_s).max(0.0), t);
        Self {
            meta: CollisionMeta {
                collision_time_s: round_to(t, 3),
                collision_pair: pair.to_string(),
                min_sep_m: round_to(min_sep, 2),
                window_s,
                world: arena.into(),
            },
            pair_names: window.pair_names,
            sim_log: window.sim,
            pair_distances: window.pairs,
            trigger_log: window.triggers,
        }
    }

    /// Suggested file name, `coll_<ms>.json`
    pub fn file_name(&self) -> String {
        format!("coll_{}.json", (self.meta.collision_time_s * 1000.0).round() as u64)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(t: f64) -> TriggerLogRow {
        TriggerLogRow {
            t,
            aircraft_id: "A1".into(),
            trigger_id: trigger_id("M", t),
            source: LogSource::Midair,
            note: String::new(),
        }
    }

    #[test]
    fn test_trigger_id_format() {
        assert_eq!(trigger_id("M", 1.2345), "M001234");
        assert_eq!(trigger_id("RTO", 0.0), "RTO000000");
        assert_eq!(trigger_id("W", 1234.5678), "W1234567");
    }

    #[test]
    fn test_series_buffer_caps_rows() {
        let mut buf = SeriesBuffer::new(vec!["A1-A2".into()], 3);
        for i in 0..5 {
            buf.push(SeriesRow {
                t: i as f64,
                values: vec![i as f64 * 10.0],
            });
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.rows.front().unwrap().t, 2.0);
        let last = buf.rows.back().unwrap();
        assert_eq!(buf.value(last, "A1-A2"), Some(40.0));
        assert_eq!(buf.value(last, "A1-A3"), None);
    }

    #[test]
    fn test_window_filters_by_time() {
        let mut log = EventLog::new(vec!["A1-A2".into()]);
        for t in [1.0, 5.0, 9.0, 12.0] {
            log.record(trigger(t));
            log.pairs.push(PairDistanceRow {
                t,
                active_triggers: String::new(),
                distances: vec![100.0],
            });
        }
        let w = log.window(4.0, 10.0);
        assert_eq!(w.triggers.len(), 2);
        assert_eq!(w.pairs.len(), 2);
        assert_eq!(w.pair_names, vec!["A1-A2".to_string()]);
    }

    #[test]
    fn test_recent_triggers_newest_first() {
        let mut log = EventLog::default();
        for t in [1.0, 2.0, 3.0] {
            log.record(trigger(t));
        }
        let recent: Vec<f64> = log.recent_triggers(2).map(|r| r.t).collect();
        assert_eq!(recent, vec![3.0, 2.0]);
    }

    #[test]
    fn test_collision_report_meta() {
        let mut log = EventLog::new(vec!["A1-A2".into()]);
        log.record(trigger(2.0));
        log.record(trigger(15.0));
        let report = CollisionReport::extract(&log, 14.56789, "A1-A2", 8.1234, 10.0, Arena::default());
        assert_eq!(report.meta.collision_time_s, 14.568);
        assert_eq!(report.meta.min_sep_m, 8.12);
        assert_eq!(report.trigger_log.len(), 0);
        assert_eq!(report.file_name(), "coll_14568.json");
        let json = report.to_json().unwrap();
        assert!(json.contains("\"collision_pair\":\"A1-A2\""));
    }

    #[test]
    fn test_log_source_serializes_kebab() {
        let json = serde_json::to_string(&LogSource::OobReturn).unwrap();
        assert_eq!(json, "\"oob-return\"");
    }
}
