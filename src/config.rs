use crate::AttackError;

use serde::{Deserialize, Serialize};

use std::collections::HashSet;

/// How each secret position is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrackMode {
    /// Measure every character with the full sample count.
    Exhaustive { samples: usize },
    /// Rough pre-pass over every character, then a full re-measure of the
    /// best `survivors`.
    Ranking {
        prepass_samples: usize,
        survivors: usize,
        verify_samples: usize,
    },
}

impl CrackMode {
    pub fn name(&self) -> &'static str {
        match self {
            CrackMode::Exhaustive { .. } => "exhaustive",
            CrackMode::Ranking { .. } => "ranking",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    pub username: String,
    /// Characters the secret may contain, in submission order.
    pub alphabet: String,
    /// Padding character for length probes and unknown positions.
    pub filler: char,
    pub min_length: usize,
    pub max_length: usize,
    pub length_samples: usize,
    /// Samples per length when the top two lengths are re-measured.
    pub length_remeasure_samples: usize,
    /// Re-measure when the leading length is ahead of the runner-up by less
    /// than this fraction of its latency. Zero never re-measures.
    pub length_tolerance: f64,
    pub mode: CrackMode,
    /// Positions won by less than this fraction are low-confidence.
    pub significance: f64,
    pub rerun_low_confidence: bool,
    /// Maximum oracle attempts in flight across the whole run.
    pub max_in_flight: usize,
    /// Largest fraction of failed attempts one aggregate tolerates.
    pub max_failure_fraction: f64,
    /// Characters already known; cracking resumes after them.
    pub known_prefix: String,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            alphabet: "abcdefghijklmnopqrstuvwxyz".to_string(),
            filler: 'a',
            min_length: 1,
            max_length: 32,
            length_samples: 8,
            length_remeasure_samples: 32,
            length_tolerance: 0.0,
            mode: CrackMode::Ranking {
                prepass_samples: 2,
                survivors: 3,
                verify_samples: 6,
            },
            significance: 0.01,
            rerun_low_confidence: false,
            max_in_flight: 8,
            max_failure_fraction: 0.5,
            known_prefix: String::new(),
        }
    }
}

impl AttackConfig {
    pub fn with_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn alphabet(&self) -> Vec<char> {
        self.alphabet.chars().collect()
    }

    pub fn validate(&self) -> Result<(), AttackError> {
        let invalid = |msg: String| Err(AttackError::InvalidConfig(msg));

        if self.username.is_empty() {
            return invalid("username cannot be empty".to_string());
        }
        if self.alphabet.is_empty() {
            return invalid("alphabet cannot be empty".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.alphabet.chars().find(|c| !seen.insert(*c)) {
            return invalid(format!("alphabet contains '{dup}' more than once"));
        }
        if self.min_length == 0 || self.min_length > self.max_length {
            return invalid(format!(
                "length range {}..={} is empty or starts at zero",
                self.min_length, self.max_length
            ));
        }
        if self.length_samples == 0 || self.length_remeasure_samples == 0 {
            return invalid("length sample counts must be positive".to_string());
        }
        match self.mode {
            CrackMode::Exhaustive { samples } if samples == 0 => {
                return invalid("exhaustive sample count must be positive".to_string());
            }
            CrackMode::Ranking {
                prepass_samples,
                survivors,
                verify_samples,
            } if prepass_samples == 0 || survivors == 0 || verify_samples == 0 => {
                return invalid("ranking sample counts and survivors must be positive".to_string());
            }
            _ => {}
        }
        if self.max_in_flight == 0 {
            return invalid("max_in_flight must be positive".to_string());
        }
        for (name, value) in [
            ("length_tolerance", self.length_tolerance),
            ("significance", self.significance),
            ("max_failure_fraction", self.max_failure_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[test]
    fn default_with_username_is_valid() {
        assert!(AttackConfig::with_username("alice").validate().is_ok());
    }

    #[rstest]
    #[case(AttackConfig::default())]
    #[case(AttackConfig { alphabet: String::new(), ..AttackConfig::with_username("a") })]
    #[case(AttackConfig { alphabet: "abca".to_string(), ..AttackConfig::with_username("a") })]
    #[case(AttackConfig { min_length: 0, ..AttackConfig::with_username("a") })]
    #[case(AttackConfig { min_length: 9, max_length: 4, ..AttackConfig::with_username("a") })]
    #[case(AttackConfig { length_samples: 0, ..AttackConfig::with_username("a") })]
    #[case(AttackConfig {
        mode: CrackMode::Exhaustive { samples: 0 },
        ..AttackConfig::with_username("a")
    })]
    #[case(AttackConfig {
        mode: CrackMode::Ranking { prepass_samples: 1, survivors: 0, verify_samples: 4 },
        ..AttackConfig::with_username("a")
    })]
    #[case(AttackConfig { max_in_flight: 0, ..AttackConfig::with_username("a") })]
    #[case(AttackConfig { significance: 1.5, ..AttackConfig::with_username("a") })]
    fn validate_rejects_unusable_config(#[case] config: AttackConfig) {
        assert!(matches!(config.validate(), Err(AttackError::InvalidConfig(_))));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AttackConfig = serde_json::from_str(
            r#"{"username": "alice", "mode": {"kind": "exhaustive", "samples": 12}}"#,
        )
        .unwrap();

        assert_eq!(config.username, "alice");
        assert_eq!(config.mode, CrackMode::Exhaustive { samples: 12 });
        assert_eq!(config.max_length, 32);
    }
}
