//! The timing oracle: one authentication attempt, one latency measurement.

use crate::{stats::serialize_secs, Guess};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;

use std::{
    future::Future,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

/// A single attempt that produced no timing.
#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("oracle client halted")]
    Halted,
    #[error("simulated failure: {0}")]
    Simulated(String),
}

/// Something that answers login attempts and can be timed.
///
/// Implementations send exactly one attempt per call and return the time
/// from just before dispatch to just after the complete response. A
/// rejected login is still a valid measurement.
pub trait TimingOracle: Send + Sync + 'static {
    fn measure(
        &self,
        guess: &Guess,
    ) -> impl Future<Output = Result<Duration, TransportFailure>> + Send;
}

/// One latency measurement for one guess.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub seq: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub url: String,
    pub timeout: Duration,
    pub difficulty: Option<u32>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1".to_string(),
            timeout: Duration::from_secs(10),
            difficulty: None,
        }
    }
}

/// Times login attempts against an HTTP endpoint taking `user` and
/// `password` query parameters.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    target: TargetConfig,
}

impl HttpOracle {
    pub fn new(target: TargetConfig) -> Result<Self, TransportFailure> {
        let client = reqwest::Client::builder().timeout(target.timeout).build()?;
        Ok(Self { client, target })
    }

    fn request(&self, guess: &Guess) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(&self.target.url)
            .query(&[("user", guess.username()), ("password", guess.password())]);
        match self.target.difficulty {
            Some(difficulty) => request.query(&[("difficulty", difficulty)]),
            None => request,
        }
    }

    /// Submit `guess` once and report whether the target accepted it.
    pub async fn verify(&self, guess: &Guess) -> Result<bool, TransportFailure> {
        let body = self.request(guess).send().await?.text().await?;
        Ok(body.contains('1'))
    }
}

impl TimingOracle for HttpOracle {
    async fn measure(&self, guess: &Guess) -> Result<Duration, TransportFailure> {
        let request = self.request(guess);
        let start = Instant::now();
        let response = request.send().await?;
        response.bytes().await?;
        Ok(start.elapsed())
    }
}

/// An in-process oracle whose latency is a pure function of the password.
///
/// With a `hold` each attempt really waits that long, which lets tests
/// observe how many attempts overlap.
pub struct SimulatedOracle<F> {
    latency: F,
    hold: Option<Duration>,
}

impl<F> SimulatedOracle<F>
where
    F: Fn(&str) -> Duration + Send + Sync + 'static,
{
    pub fn from_fn(latency: F) -> Self {
        Self {
            latency,
            hold: None,
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }
}

impl SimulatedOracle<Box<dyn Fn(&str) -> Duration + Send + Sync>> {
    /// A server that rejects wrong lengths at once and otherwise spends one
    /// `unit`, plus one more per matching leading character.
    pub fn leaky(secret: &str, unit: Duration) -> Self {
        let secret: Vec<char> = secret.chars().collect();
        let latency: Box<dyn Fn(&str) -> Duration + Send + Sync> = Box::new(move |password: &str| {
            if password.chars().count() != secret.len() {
                return unit;
            }
            let matched = password
                .chars()
                .zip(&secret)
                .take_while(|(a, b)| a == *b)
                .count();
            unit * (2 + matched as u32)
        });
        Self::from_fn(latency)
    }
}

impl<F> TimingOracle for SimulatedOracle<F>
where
    F: Fn(&str) -> Duration + Send + Sync + 'static,
{
    async fn measure(&self, guess: &Guess) -> Result<Duration, TransportFailure> {
        let latency = (self.latency)(guess.password());
        if let Some(hold) = self.hold {
            tokio::time::sleep(hold).await;
        }
        Ok(latency)
    }
}

/// Run-wide wrapper around an oracle.
///
/// Bounds the number of attempts in flight across every round of a run,
/// numbers samples in dispatch order and counts calls.
pub struct OracleClient<O> {
    oracle: O,
    permits: Semaphore,
    next_seq: AtomicU64,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl<O: TimingOracle> OracleClient<O> {
    pub fn new(oracle: O, max_in_flight: usize) -> Self {
        Self {
            oracle,
            permits: Semaphore::new(max_in_flight),
            next_seq: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub async fn measure_once(&self, guess: &Guess) -> Result<Sample, TransportFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportFailure::Halted)?;

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::Relaxed);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let taken_at = Utc::now();

        let result = self.oracle.measure(guess).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map(|elapsed| Sample {
            seq,
            elapsed,
            taken_at,
        })
    }

    /// Stop dispatching. Attempts already holding a permit finish; every
    /// waiting or later attempt fails with `TransportFailure::Halted`.
    pub fn halt(&self) {
        self.permits.close();
    }

    pub fn is_halted(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[tokio::test]
    async fn measure_once_numbers_samples_in_dispatch_order() {
        let client = OracleClient::new(SimulatedOracle::from_fn(|_| Duration::from_millis(3)), 2);
        let guess = Guess::new("alice", "abc");

        let first = client.measure_once(&guess).await.unwrap();
        let second = client.measure_once(&guess).await.unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.elapsed, Duration::from_millis(3));
        assert!(second.taken_at >= first.taken_at);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn halted_client_refuses_new_attempts() {
        let client = OracleClient::new(SimulatedOracle::from_fn(|_| Duration::from_millis(1)), 1);
        client.halt();

        let result = client.measure_once(&Guess::new("alice", "a")).await;

        assert!(matches!(result, Err(TransportFailure::Halted)));
        assert!(client.is_halted());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_attempts_never_exceed_permits() {
        let oracle = SimulatedOracle::from_fn(|_| Duration::from_millis(1))
            .with_hold(Duration::from_millis(5));
        let client = Arc::new(OracleClient::new(oracle, 3));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let client = Arc::clone(&client);
                let guess = Guess::new("u", i.to_string());
                tokio::spawn(async move { client.measure_once(&guess).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert!(client.peak_in_flight() <= 3);
        assert!(client.peak_in_flight() >= 1);
        assert_eq!(client.calls(), 20);
    }

    #[test]
    fn leaky_simulation_rewards_length_then_prefix() {
        let oracle = SimulatedOracle::leaky("cat", Duration::from_millis(1));
        let latency = |p: &str| (oracle.latency)(p);

        assert_eq!(latency("aaaa"), Duration::from_millis(1));
        assert_eq!(latency("aaa"), Duration::from_millis(2));
        assert_eq!(latency("cbb"), Duration::from_millis(3));
        assert_eq!(latency("caa"), Duration::from_millis(4));
        assert_eq!(latency("cat"), Duration::from_millis(5));
    }
}
