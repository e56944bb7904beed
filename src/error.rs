use crate::oracle::TransportFailure;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttackError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Too many attempts for one guess failed at the transport level.
    #[error("oracle unavailable while measuring '{password}': {failed} of {attempted} attempts failed ({last_error})")]
    OracleUnavailable {
        password: String,
        failed: usize,
        attempted: usize,
        last_error: String,
    },

    /// The top two lengths stayed within tolerance after re-measuring them.
    #[error("length discovery exhausted lengths {min}..={max}: lengths {first} and {second} did not separate")]
    Exhausted {
        min: usize,
        max: usize,
        first: usize,
        second: usize,
    },

    #[error("measurement cancelled after the oracle client was halted")]
    Cancelled,

    #[error("duplicate candidate '{0}' in one evaluation round")]
    DuplicateCandidate(String),

    #[error(transparent)]
    Transport(#[from] TransportFailure),
}
