mod attack;
mod config;
mod crack;
mod error;
mod evaluator;
mod guess;
mod length;
pub mod oracle;
pub mod report;
mod sampler;
pub mod server;
mod state;
pub mod stats;

pub use attack::{Attack, AttackFailure, Plan};
pub use config::{AttackConfig, CrackMode};
pub use crack::{crack_secret, CrackState};
pub use error::AttackError;
pub use evaluator::{CandidateEvaluator, RankedGuess, Ranking};
pub use guess::Guess;
pub use length::{discover_length, LengthState};
pub use oracle::{HttpOracle, OracleClient, SimulatedOracle, TargetConfig, TimingOracle};
pub use sampler::{Measurement, Sampler};
pub use state::{
    AttackReport, AttackState, CandidateScore, LengthRecord, LengthSource, Phase, PositionRecord,
    RunStatus, Stage, Trace, TraceRecord,
};
