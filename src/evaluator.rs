use crate::{
    oracle::{Sample, TimingOracle},
    sampler::Sampler,
    stats, AttackError, Guess,
};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::warn;

use std::{collections::HashSet, time::Duration};

#[derive(Debug, Clone)]
pub struct RankedGuess {
    pub guess: Guess,
    pub aggregate: Duration,
    /// Position of the guess in the submitted candidate list.
    pub submitted: usize,
    pub samples: Vec<Sample>,
}

/// Guesses ordered by descending aggregate latency.
///
/// Equal aggregates keep submission order.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    entries: Vec<RankedGuess>,
}

impl Ranking {
    fn from_measured(mut entries: Vec<RankedGuess>) -> Self {
        entries.sort_by_key(|e| e.submitted);
        // `sort_by` is stable, so ties stay in submission order.
        entries.sort_by(|a, b| b.aggregate.cmp(&a.aggregate));
        Self { entries }
    }

    pub fn entries(&self) -> &[RankedGuess] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn leader(&self) -> Option<&RankedGuess> {
        self.entries.first()
    }

    pub fn runner_up(&self) -> Option<&RankedGuess> {
        self.entries.get(1)
    }

    /// Lead of the first entry over the second, as a fraction of the first.
    /// A single entry leads by 1.
    pub fn margin(&self) -> f64 {
        match (self.leader(), self.runner_up()) {
            (Some(top), Some(second)) => stats::relative_margin(top.aggregate, second.aggregate),
            (Some(_), None) => 1.0,
            _ => 0.0,
        }
    }

    /// Whether the first two entries have identical aggregates.
    pub fn is_tied(&self) -> bool {
        self.tied_at(1)
    }

    /// Whether the entries either side of a cut after `k` entries tie.
    pub fn tied_at(&self, k: usize) -> bool {
        match (k.checked_sub(1).and_then(|i| self.entries.get(i)), self.entries.get(k)) {
            (Some(a), Some(b)) => a.aggregate == b.aggregate,
            _ => false,
        }
    }

    pub fn top(&self, k: usize) -> &[RankedGuess] {
        &self.entries[..k.min(self.entries.len())]
    }

    pub fn sample_count(&self) -> usize {
        self.entries.iter().map(|e| e.samples.len()).sum()
    }
}

/// Ranks opaque guesses by latency; the only measurement primitive the
/// phases use.
pub struct CandidateEvaluator<O> {
    sampler: Sampler<O>,
}

impl<O: TimingOracle> CandidateEvaluator<O> {
    pub fn new(sampler: Sampler<O>) -> Self {
        Self { sampler }
    }

    pub fn sampler(&self) -> &Sampler<O> {
        &self.sampler
    }

    /// Measure every candidate concurrently and rank them.
    ///
    /// On the first failure the oracle client is halted, in-flight attempts
    /// drain and the whole round is discarded.
    pub async fn rank(
        &self,
        candidates: Vec<Guess>,
        sample_count: usize,
    ) -> Result<Ranking, AttackError> {
        let mut seen = HashSet::with_capacity(candidates.len());
        if let Some(dup) = candidates.iter().find(|g| !seen.insert(*g)) {
            return Err(AttackError::DuplicateCandidate(dup.password().to_string()));
        }

        let mut pending: FuturesUnordered<_> = candidates
            .into_iter()
            .enumerate()
            .map(|(submitted, guess)| async move {
                let result = self.sampler.aggregate(&guess, sample_count).await;
                (submitted, result)
            })
            .collect();

        let mut measured = Vec::with_capacity(pending.len());
        let mut failure = None;
        while let Some((submitted, result)) = pending.next().await {
            match result {
                Ok(m) => measured.push(RankedGuess {
                    guess: m.guess,
                    aggregate: m.aggregate,
                    submitted,
                    samples: m.samples,
                }),
                Err(e) if failure.is_none() => {
                    warn!(error = %e, "abandoning evaluation round");
                    self.sampler.client().halt();
                    failure = Some(e);
                }
                // Rounds cut short by the halt above.
                Err(_) => {}
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Ranking::from_measured(measured)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::oracle::{OracleClient, SimulatedOracle, TransportFailure};

    use std::sync::Arc;

    fn evaluator<O: TimingOracle>(oracle: O, max_in_flight: usize) -> CandidateEvaluator<O> {
        let client = Arc::new(OracleClient::new(oracle, max_in_flight));
        CandidateEvaluator::new(Sampler::new(client, 0.5))
    }

    fn guesses(passwords: &[&str]) -> Vec<Guess> {
        passwords.iter().map(|p| Guess::new("alice", *p)).collect()
    }

    fn passwords(ranking: &Ranking) -> Vec<&str> {
        ranking.entries().iter().map(|e| e.guess.password()).collect()
    }

    #[tokio::test]
    async fn rank_orders_by_descending_latency() {
        let evaluator = evaluator(
            SimulatedOracle::from_fn(|p: &str| Duration::from_micros(p.len() as u64)),
            4,
        );

        let ranking = evaluator.rank(guesses(&["bb", "a", "dddd", "ccc"]), 3).await.unwrap();

        assert_eq!(passwords(&ranking), ["dddd", "ccc", "bb", "a"]);
        assert_eq!(ranking.sample_count(), 12);
        assert!((ranking.margin() - 0.25).abs() < 1e-9);
        assert!(!ranking.is_tied());
    }

    #[tokio::test]
    async fn rank_keeps_submission_order_for_ties() {
        let evaluator = evaluator(SimulatedOracle::from_fn(|_: &str| Duration::from_millis(2)), 4);

        let ranking = evaluator.rank(guesses(&["b", "c", "a"]), 3).await.unwrap();

        assert_eq!(passwords(&ranking), ["b", "c", "a"]);
        assert!(ranking.is_tied());
        assert_eq!(ranking.margin(), 0.0);
    }

    #[tokio::test]
    async fn rank_rejects_duplicate_candidates() {
        let evaluator = evaluator(SimulatedOracle::from_fn(|_: &str| Duration::from_millis(1)), 2);

        let result = evaluator.rank(guesses(&["a", "b", "a"]), 1).await;

        assert!(matches!(result, Err(AttackError::DuplicateCandidate(p)) if p == "a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rank_respects_global_concurrency_bound() {
        let oracle = SimulatedOracle::from_fn(|_: &str| Duration::from_millis(1))
            .with_hold(Duration::from_millis(2));
        let evaluator = evaluator(oracle, 3);
        let candidates: Vec<Guess> = (0..10).map(|i| Guess::new("alice", i.to_string())).collect();

        evaluator.rank(candidates, 4).await.unwrap();

        assert!(evaluator.sampler().client().peak_in_flight() <= 3);
        assert_eq!(evaluator.sampler().client().calls(), 40);
    }

    struct FailingFor(&'static str);

    impl TimingOracle for FailingFor {
        async fn measure(&self, guess: &Guess) -> Result<Duration, TransportFailure> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if guess.password() == self.0 {
                Err(TransportFailure::Simulated("connection reset".to_string()))
            } else {
                Ok(Duration::from_millis(1))
            }
        }
    }

    #[tokio::test]
    async fn rank_fails_round_and_halts_client_on_unavailable_oracle() {
        let evaluator = evaluator(FailingFor("b"), 2);

        let result = evaluator.rank(guesses(&["a", "b", "c", "d"]), 4).await;

        assert!(matches!(result, Err(AttackError::OracleUnavailable { .. })));
        assert!(evaluator.sampler().client().is_halted());
    }

    #[test]
    fn tied_at_compares_entries_around_cut() {
        let entry = |submitted: usize, micros: u64| RankedGuess {
            guess: Guess::new("alice", submitted.to_string()),
            aggregate: Duration::from_micros(micros),
            submitted,
            samples: Vec::new(),
        };
        let ranking =
            Ranking::from_measured(vec![entry(0, 9), entry(1, 7), entry(2, 7), entry(3, 1)]);

        assert!(!ranking.tied_at(1));
        assert!(ranking.tied_at(2));
        assert!(!ranking.tied_at(3));
        assert!(!ranking.tied_at(4));
        assert_eq!(ranking.top(2).len(), 2);
        assert_eq!(ranking.top(10).len(), 4);
    }
}
