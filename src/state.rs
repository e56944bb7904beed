//! Run state threaded through the phases, and the frozen report it becomes.

use crate::{
    evaluator::Ranking,
    length::LengthState,
    stats::serialize_secs,
    AttackConfig, AttackError,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LengthDiscovery,
    CharacterCracking,
}

/// Which evaluation round inside a phase produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Probe,
    Remeasure,
    Exhaustive,
    Prepass,
    Verification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub seq: u64,
    pub phase: Phase,
    pub stage: Stage,
    pub position: Option<usize>,
    pub password: String,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub taken_at: DateTime<Utc>,
}

/// Every sample of a run, ordered by sequence number.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Trace {
    records: Vec<TraceRecord>,
}

impl Trace {
    pub fn record(&mut self, record: TraceRecord) {
        let slot = self.records.partition_point(|r| r.seq < record.seq);
        self.records.insert(slot, record);
    }

    /// Record every sample of a completed round.
    pub fn record_round(
        &mut self,
        phase: Phase,
        stage: Stage,
        position: Option<usize>,
        ranking: &Ranking,
    ) {
        for entry in ranking.entries() {
            for sample in &entry.samples {
                self.record(TraceRecord {
                    seq: sample.seq,
                    phase,
                    stage,
                    position,
                    password: entry.guess.password().to_string(),
                    elapsed: sample.elapsed,
                    taken_at: sample.taken_at,
                });
            }
        }
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Summary of one ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub password: String,
    #[serde(serialize_with = "serialize_secs")]
    pub aggregate: Duration,
    pub samples: usize,
}

impl CandidateScore {
    pub fn from_ranking(ranking: &Ranking) -> Vec<Self> {
        ranking
            .entries()
            .iter()
            .map(|e| Self {
                password: e.guess.password().to_string(),
                aggregate: e.aggregate,
                samples: e.samples.len(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LengthRecord {
    pub scores: Vec<(usize, CandidateScore)>,
    pub remeasured: Option<Vec<(usize, CandidateScore)>>,
    pub outcome: LengthState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub position: usize,
    pub chosen: char,
    #[serde(serialize_with = "serialize_secs")]
    pub aggregate: Duration,
    pub margin: f64,
    /// Stages whose decision point was an exact tie, settled by submission
    /// order.
    pub ties: Vec<Stage>,
    pub low_confidence: bool,
    pub rerun: bool,
    pub prepass: Option<Vec<CandidateScore>>,
    pub decision: Vec<CandidateScore>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthSource {
    Discovered,
    Supplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted { reason: String },
}

/// Mutable state of one run. Owned by the orchestrator and lent to each
/// phase in turn.
#[derive(Debug)]
pub struct AttackState {
    config: AttackConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    pub length: Option<usize>,
    pub length_source: Option<LengthSource>,
    pub prefix: String,
    pub length_record: Option<LengthRecord>,
    pub positions: Vec<PositionRecord>,
    pub trace: Trace,
}

impl AttackState {
    pub fn new(config: &AttackConfig) -> Self {
        Self {
            config: config.clone(),
            started_at: Utc::now(),
            started: Instant::now(),
            length: None,
            length_source: None,
            prefix: config.known_prefix.clone(),
            length_record: None,
            positions: Vec::new(),
            trace: Trace::default(),
        }
    }

    pub fn assume_length(&mut self, length: usize) {
        self.length = Some(length);
        self.length_source = Some(LengthSource::Supplied);
    }

    pub fn finalize(
        self,
        error: Option<&AttackError>,
        oracle_calls: u64,
        peak_in_flight: usize,
    ) -> AttackReport {
        let status = match error {
            Some(e) => RunStatus::Aborted {
                reason: e.to_string(),
            },
            None => RunStatus::Completed,
        };
        let complete = self.length.is_some_and(|n| self.prefix.chars().count() == n);
        let low_confidence_positions = self
            .positions
            .iter()
            .filter(|p| p.low_confidence)
            .map(|p| p.position)
            .collect();
        AttackReport {
            config: self.config,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed: self.started.elapsed(),
            length: self.length,
            length_source: self.length_source,
            recovered: self.prefix,
            complete,
            low_confidence_positions,
            oracle_calls,
            peak_in_flight,
            length_discovery: self.length_record,
            positions: self.positions,
            trace: self.trace,
        }
    }
}

/// The frozen outcome of a run, handed to whatever persists it.
#[derive(Debug, Clone, Serialize)]
pub struct AttackReport {
    pub config: AttackConfig,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub length: Option<usize>,
    pub length_source: Option<LengthSource>,
    /// The recovered prefix; the whole secret when `complete`.
    pub recovered: String,
    pub complete: bool,
    pub low_confidence_positions: Vec<usize>,
    pub oracle_calls: u64,
    pub peak_in_flight: usize,
    pub length_discovery: Option<LengthRecord>,
    pub positions: Vec<PositionRecord>,
    pub trace: Trace,
}

impl AttackReport {
    /// The full secret, if the run recovered every position.
    pub fn secret(&self) -> Option<&str> {
        self.complete.then_some(self.recovered.as_str())
    }
}
