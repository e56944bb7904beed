use crate::{
    oracle::{OracleClient, Sample, TimingOracle, TransportFailure},
    stats, AttackError, Guess,
};

use futures::future::join_all;
use tracing::{debug, warn};

use std::{sync::Arc, time::Duration};

/// Every successful sample for one guess and their median.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub guess: Guess,
    pub aggregate: Duration,
    pub samples: Vec<Sample>,
    pub failures: usize,
}

pub struct Sampler<O> {
    client: Arc<OracleClient<O>>,
    max_failure_fraction: f64,
}

impl<O: TimingOracle> Sampler<O> {
    pub fn new(client: Arc<OracleClient<O>>, max_failure_fraction: f64) -> Self {
        Self {
            client,
            max_failure_fraction,
        }
    }

    pub fn client(&self) -> &OracleClient<O> {
        &self.client
    }

    /// Time `guess` `sample_count` times in parallel and reduce to the median.
    pub async fn aggregate(
        &self,
        guess: &Guess,
        sample_count: usize,
    ) -> Result<Measurement, AttackError> {
        let tasks: Vec<_> = (0..sample_count)
            .map(|_| {
                let client = Arc::clone(&self.client);
                let guess = guess.clone();
                tokio::spawn(async move { client.measure_once(&guess).await })
            })
            .collect();

        let mut samples = Vec::with_capacity(sample_count);
        let mut failures = 0;
        let mut halted = false;
        let mut last_error = String::new();
        for result in join_all(tasks).await {
            match result {
                Ok(Ok(sample)) => samples.push(sample),
                Ok(Err(TransportFailure::Halted)) => halted = true,
                Ok(Err(e)) => {
                    debug!(password = guess.password(), error = %e, "attempt failed");
                    last_error = e.to_string();
                    failures += 1;
                }
                Err(e) => {
                    warn!(error = %e, "measurement task did not complete");
                    last_error = e.to_string();
                    failures += 1;
                }
            }
        }

        if halted {
            return Err(AttackError::Cancelled);
        }
        if samples.is_empty() || failures as f64 > self.max_failure_fraction * sample_count as f64 {
            return Err(AttackError::OracleUnavailable {
                password: guess.password().to_string(),
                failed: failures,
                attempted: sample_count,
                last_error,
            });
        }

        let mut latencies: Vec<Duration> = samples.iter().map(|s| s.elapsed).collect();
        let aggregate = stats::median(&mut latencies).ok_or(AttackError::Cancelled)?;
        Ok(Measurement {
            guess: guess.clone(),
            aggregate,
            samples,
            failures,
        })
    }
}
