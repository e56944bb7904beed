use crate::{
    crack::crack_secret,
    evaluator::CandidateEvaluator,
    length::discover_length,
    oracle::{OracleClient, TimingOracle},
    report::format_secs,
    sampler::Sampler,
    state::{AttackReport, AttackState},
    AttackConfig, AttackError,
};

use thiserror::Error;
use tracing::{error, info};

use std::sync::Arc;

/// Which phases a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    LengthOnly,
    Full,
    /// Skip length discovery and crack a secret of this length.
    KnownLength(usize),
}

/// A run that stopped early, with everything recovered before it stopped.
#[derive(Debug, Error)]
#[error("attack aborted: {error}")]
pub struct AttackFailure {
    pub error: AttackError,
    pub report: AttackReport,
}

pub struct Attack<O> {
    config: AttackConfig,
    client: Arc<OracleClient<O>>,
    evaluator: CandidateEvaluator<O>,
}

impl<O: TimingOracle> Attack<O> {
    pub fn new(oracle: O, config: AttackConfig) -> Result<Self, AttackError> {
        config.validate()?;
        let client = Arc::new(OracleClient::new(oracle, config.max_in_flight));
        let sampler = Sampler::new(Arc::clone(&client), config.max_failure_fraction);
        Ok(Self {
            config,
            client,
            evaluator: CandidateEvaluator::new(sampler),
        })
    }

    /// Run `plan` to completion or to the first fatal error.
    ///
    /// Either way the state is finalized into a report; on failure the
    /// report travels inside the returned `AttackFailure`.
    pub async fn run(self, plan: Plan) -> Result<AttackReport, AttackFailure> {
        let mut state = AttackState::new(&self.config);
        info!(
            ?plan,
            username = %self.config.username,
            mode = self.config.mode.name(),
            "starting attack"
        );

        let outcome = self.execute(plan, &mut state).await;
        if outcome.is_err() {
            // Nothing new is dispatched once a run has failed.
            self.client.halt();
        }
        let report = state.finalize(
            outcome.as_ref().err(),
            self.client.calls(),
            self.client.peak_in_flight(),
        );

        match outcome {
            Ok(()) => {
                info!(
                    recovered = %report.recovered,
                    calls = report.oracle_calls,
                    elapsed = %format_secs(report.elapsed),
                    "attack finished"
                );
                Ok(report)
            }
            Err(error) => {
                error!(%error, recovered = %report.recovered, "attack aborted");
                Err(AttackFailure { error, report })
            }
        }
    }

    async fn execute(&self, plan: Plan, state: &mut AttackState) -> Result<(), AttackError> {
        let length = match plan {
            Plan::KnownLength(length) => {
                if length == 0 {
                    return Err(AttackError::InvalidConfig(
                        "secret length must be positive".to_string(),
                    ));
                }
                state.assume_length(length);
                length
            }
            Plan::LengthOnly | Plan::Full => {
                discover_length(&self.evaluator, &self.config, state).await?
            }
        };
        if plan == Plan::LengthOnly {
            return Ok(());
        }
        crack_secret(&self.evaluator, &self.config, length, state).await?;
        Ok(())
    }
}
