//! Finding the secret length.
//!
//! A guess of the right length makes the target compare characters instead
//! of rejecting on length alone, so the right length is the slowest probe.

use crate::{
    evaluator::{CandidateEvaluator, Ranking},
    oracle::TimingOracle,
    state::{AttackState, CandidateScore, LengthRecord, LengthSource, Phase, Stage},
    AttackConfig, AttackError, Guess,
};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "length", rename_all = "snake_case")]
pub enum LengthState {
    /// Probing every length up to the given maximum.
    Probing(usize),
    Confirmed(usize),
    Exhausted,
}

#[instrument(skip_all, fields(min = config.min_length, max = config.max_length))]
pub async fn discover_length<O: TimingOracle>(
    evaluator: &CandidateEvaluator<O>,
    config: &AttackConfig,
    state: &mut AttackState,
) -> Result<usize, AttackError> {
    config.validate()?;
    let mut phase = LengthState::Probing(config.max_length);
    debug!(?phase, "probing lengths");

    let lengths: Vec<usize> = (config.min_length..=config.max_length).collect();
    let probes = lengths
        .iter()
        .map(|&n| Guess::filler(&config.username, config.filler, n))
        .collect();
    let ranking = evaluator.rank(probes, config.length_samples).await?;
    state
        .trace
        .record_round(Phase::LengthDiscovery, Stage::Probe, None, &ranking);
    for entry in ranking.entries() {
        debug!(
            length = lengths[entry.submitted],
            median = entry.aggregate.as_secs_f64(),
            samples = entry.samples.len(),
            "length probe"
        );
    }

    let mut record = LengthRecord {
        scores: scores(&ranking, &lengths),
        remeasured: None,
        outcome: phase,
    };

    let (mut best, mut margin) = leader(&ranking, &lengths);
    if let Some(second) = runner_up(&ranking, &lengths) {
        if margin < config.length_tolerance {
            info!(best, second, margin, "ambiguous length signal, re-measuring");
            let pair = [best, second];
            let probes = pair
                .iter()
                .map(|&n| Guess::filler(&config.username, config.filler, n))
                .collect();
            let ranking = evaluator
                .rank(probes, config.length_remeasure_samples)
                .await?;
            state
                .trace
                .record_round(Phase::LengthDiscovery, Stage::Remeasure, None, &ranking);
            record.remeasured = Some(scores(&ranking, &pair));
            (best, margin) = leader(&ranking, &pair);

            if margin < config.length_tolerance {
                phase = LengthState::Exhausted;
                warn!(?phase, best, margin, "lengths did not separate");
                record.outcome = phase;
                state.length_record = Some(record);
                return Err(AttackError::Exhausted {
                    min: config.min_length,
                    max: config.max_length,
                    first: best,
                    second: if best == pair[0] { pair[1] } else { pair[0] },
                });
            }
        }
    }

    phase = LengthState::Confirmed(best);
    info!(length = best, margin, "password length confirmed");
    record.outcome = phase;
    state.length_record = Some(record);
    state.length = Some(best);
    state.length_source = Some(LengthSource::Discovered);
    Ok(best)
}

fn scores(ranking: &Ranking, lengths: &[usize]) -> Vec<(usize, CandidateScore)> {
    ranking
        .entries()
        .iter()
        .map(|e| lengths[e.submitted])
        .zip(CandidateScore::from_ranking(ranking))
        .collect()
}

fn leader(ranking: &Ranking, lengths: &[usize]) -> (usize, f64) {
    let best = ranking.leader().map_or(lengths[0], |e| lengths[e.submitted]);
    (best, ranking.margin())
}

fn runner_up(ranking: &Ranking, lengths: &[usize]) -> Option<usize> {
    ranking.runner_up().map(|e| lengths[e.submitted])
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        oracle::{OracleClient, SimulatedOracle},
        sampler::Sampler,
    };

    use rstest::rstest;

    use std::{sync::Arc, time::Duration};

    fn evaluator<O: TimingOracle>(oracle: O) -> CandidateEvaluator<O> {
        let client = Arc::new(OracleClient::new(oracle, 8));
        CandidateEvaluator::new(Sampler::new(client, 0.5))
    }

    fn config(min_length: usize, max_length: usize, length_samples: usize) -> AttackConfig {
        AttackConfig {
            min_length,
            max_length,
            length_samples,
            ..AttackConfig::with_username("alice")
        }
    }

    /// Latency grows with the probe length until it reaches the secret's.
    fn capped(secret_length: usize) -> impl Fn(&str) -> Duration + Send + Sync + 'static {
        move |password: &str| Duration::from_micros(100 * password.len().min(secret_length) as u64)
    }

    #[tokio::test]
    async fn discovers_every_length_up_to_32() {
        for secret_length in 1..=32 {
            let evaluator = evaluator(SimulatedOracle::from_fn(capped(secret_length)));
            let config = config(1, 32, 1);
            let mut state = AttackState::new(&config);

            let length = discover_length(&evaluator, &config, &mut state).await.unwrap();

            assert_eq!(length, secret_length);
            assert_eq!(state.length, Some(secret_length));
            assert_eq!(state.trace.len(), 32);
        }
    }

    #[rstest]
    #[case(3)]
    #[case(11)]
    #[tokio::test]
    async fn records_probe_scores_and_outcome(#[case] secret_length: usize) {
        let secret = "q".repeat(secret_length);
        let evaluator = evaluator(SimulatedOracle::leaky(&secret, Duration::from_micros(50)));
        let config = config(1, 16, 4);
        let mut state = AttackState::new(&config);

        discover_length(&evaluator, &config, &mut state).await.unwrap();

        let record = state.length_record.unwrap();
        assert_eq!(record.outcome, LengthState::Confirmed(secret_length));
        assert_eq!(record.scores.len(), 16);
        assert_eq!(record.scores[0].0, secret_length);
        assert!(record.remeasured.is_none());
        assert_eq!(state.trace.len(), 16 * 4);
    }

    #[tokio::test]
    async fn empty_length_range_is_rejected_before_probing() {
        let evaluator = evaluator(SimulatedOracle::from_fn(capped(4)));
        let config = config(5, 4, 1);
        let mut state = AttackState::new(&config);

        let result = discover_length(&evaluator, &config, &mut state).await;

        assert!(matches!(result, Err(AttackError::InvalidConfig(_))));
        assert_eq!(evaluator.sampler().client().calls(), 0);
        assert!(state.length_record.is_none());
    }

    #[tokio::test]
    async fn lengths_that_stay_close_exhaust_discovery() {
        // Lengths 4 and 5 are 1% apart, everything else far behind.
        let latency = |password: &str| match password.len() {
            5 => Duration::from_micros(1000),
            4 => Duration::from_micros(990),
            _ => Duration::from_micros(100),
        };
        let evaluator = evaluator(SimulatedOracle::from_fn(latency));
        let config = AttackConfig {
            length_tolerance: 0.05,
            length_remeasure_samples: 5,
            ..config(1, 8, 3)
        };
        let mut state = AttackState::new(&config);

        let result = discover_length(&evaluator, &config, &mut state).await;

        assert!(matches!(
            result,
            Err(AttackError::Exhausted {
                first: 5,
                second: 4,
                ..
            })
        ));
        let record = state.length_record.unwrap();
        assert_eq!(record.outcome, LengthState::Exhausted);
        assert_eq!(record.remeasured.map(|r| r.len()), Some(2));
        assert_eq!(state.trace.len(), 8 * 3 + 2 * 5);
        assert_eq!(state.length, None);
    }

    #[tokio::test]
    async fn remeasure_can_confirm_separated_length() {
        // The first probe round of length 6 is slow, later rounds are not.
        let probes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&probes);
        let latency = move |password: &str| {
            let calls = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match password.len() {
                6 if calls < 2 => Duration::from_micros(1000),
                6 => Duration::from_micros(500),
                7 => Duration::from_micros(1000),
                _ => Duration::from_micros(100),
            }
        };
        let evaluator = evaluator(SimulatedOracle::from_fn(latency));
        let config = AttackConfig {
            length_tolerance: 0.1,
            length_remeasure_samples: 3,
            ..config(6, 7, 1)
        };
        let mut state = AttackState::new(&config);

        let length = discover_length(&evaluator, &config, &mut state).await.unwrap();

        assert_eq!(length, 7);
        assert_eq!(state.length_source, Some(LengthSource::Discovered));
    }
}
