//! A deliberately leaky login endpoint for lab runs and end-to-end tests.
//!
//! `GET /?user=<name>&password=<guess>` answers `1` for a correct password
//! and `0` otherwise. The comparison rejects a wrong length at once, then
//! sleeps once before comparing and once after every matching character.

use axum::{extract::Query, http::StatusCode, response::IntoResponse, routing::get, Router};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::net::{TcpListener, ToSocketAddrs};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

pub async fn spawn_server(
    address: impl ToSocketAddrs,
    request_handler: &LeakyLoginHandler,
) -> std::io::Result<String> {
    let listener = TcpListener::bind(address).await?;
    let addr = listener.local_addr()?;
    let app = router(request_handler);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "target server stopped");
        }
    });
    Ok(format!("http://{}", addr))
}

pub fn router(request_handler: &LeakyLoginHandler) -> Router {
    let handler = Arc::new(request_handler.clone());
    Router::new().route(
        "/",
        get(move |query: Query<HashMap<String, String>>| {
            let handler = Arc::clone(&handler);
            async move { handler.handle_request(query).await }
        }),
    )
}

#[derive(Debug, Clone)]
pub struct LeakyLoginHandler {
    credentials: HashMap<String, String>,
    compare_delay: Duration,
    jitter: Duration,
    rng: Arc<Mutex<StdRng>>,
}

impl LeakyLoginHandler {
    pub fn new(compare_delay: Duration) -> Self {
        Self {
            credentials: HashMap::new(),
            compare_delay,
            jitter: Duration::ZERO,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(101))),
        }
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.credentials
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Add up to `jitter` of uniformly random delay to every response.
    pub fn with_jitter(mut self, jitter: Duration, seed: u64) -> Self {
        self.jitter = jitter;
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    pub async fn handle_request(
        &self,
        Query(params): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let user = match params.get("user") {
            Some(u) => u,
            None => return (StatusCode::BAD_REQUEST, "Missing 'user' parameter").into_response(),
        };
        let password = match params.get("password") {
            Some(p) => p,
            None => {
                return (StatusCode::BAD_REQUEST, "Missing 'password' parameter").into_response()
            }
        };

        let noise = self.noise();
        if !noise.is_zero() {
            tokio::time::sleep(noise).await;
        }

        let expected = self.credentials.get(user).map_or("", String::as_str);
        if insecure_compare(expected.as_bytes(), password.as_bytes(), self.compare_delay).await {
            (StatusCode::OK, "1").into_response()
        } else {
            (StatusCode::UNAUTHORIZED, "0").into_response()
        }
    }

    fn noise(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.jitter.as_nanos() as u64;
        let nanos = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..=max),
            Err(_) => 0,
        };
        Duration::from_nanos(nanos)
    }
}

async fn insecure_compare(a: &[u8], b: &[u8], delay: Duration) -> bool {
    if a.len() != b.len() {
        return false;
    }
    tokio::time::sleep(delay).await;
    for (&a_byte, &b_byte) in a.iter().zip(b) {
        if a_byte != b_byte {
            return false;
        }
        tokio::time::sleep(delay).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        oracle::{HttpOracle, TargetConfig, TimingOracle},
        Attack, AttackConfig, CrackMode, Guess, Plan,
    };

    fn target(addr: String) -> HttpOracle {
        HttpOracle::new(TargetConfig {
            url: addr,
            ..TargetConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn correct_password_is_accepted_and_slower() {
        let handler = LeakyLoginHandler::new(Duration::from_millis(10)).with_user("alice", "hi");
        let addr = spawn_server("127.0.0.1:0", &handler).await.unwrap();
        let oracle = target(addr);

        let right = Guess::new("alice", "hi");
        let wrong_length = Guess::new("alice", "hid");
        assert!(oracle.verify(&right).await.unwrap());
        assert!(!oracle.verify(&wrong_length).await.unwrap());

        let slow = oracle.measure(&right).await.unwrap();
        let fast = oracle.measure(&wrong_length).await.unwrap();
        assert!(slow >= Duration::from_millis(30));
        assert!(fast < slow);
    }

    #[tokio::test]
    async fn missing_parameters_are_rejected() {
        let handler = LeakyLoginHandler::new(Duration::ZERO);
        let addr = spawn_server("127.0.0.1:0", &handler).await.unwrap();

        let response = reqwest::get(format!("{}/?user=alice", addr)).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn full_attack_over_http_recovers_password() {
        let handler = LeakyLoginHandler::new(Duration::from_millis(15)).with_user("alice", "hid");
        let addr = spawn_server("127.0.0.1:0", &handler).await.unwrap();
        let config = AttackConfig {
            alphabet: "abdhi".to_string(),
            max_length: 4,
            length_samples: 3,
            mode: CrackMode::Exhaustive { samples: 3 },
            max_in_flight: 8,
            ..AttackConfig::with_username("alice")
        };

        let report = Attack::new(target(addr.clone()), config)
            .unwrap()
            .run(Plan::Full)
            .await
            .unwrap();

        assert_eq!(report.secret(), Some("hid"));
        assert!(target(addr).verify(&Guess::new("alice", "hid")).await.unwrap());
    }
}
