//! Swap error taxonomy.

use caravel_bitcoin::BitcoinError;
use caravel_monero::MoneroError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while running a swap.
#[derive(Debug, Error)]
pub enum SwapError {
    /// The counterparty sent something that contradicts the agreed terms or
    /// fails verification.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] adaptor::CryptoError),

    /// Bitcoin chain or wallet failure.
    #[error("bitcoin error: {0}")]
    Bitcoin(#[from] BitcoinError),

    /// Monero wallet failure.
    #[error("monero error: {0}")]
    Monero(MoneroError),

    /// A step that had to happen before a deadline did not.
    #[error("timeout: {0}")]
    TimeoutBreach(String),

    /// The message channel to the counterparty failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Quote rejected by the maker's policy.
    #[error("quote rejected: {0}")]
    Quote(String),

    /// Retries of a transient failure are exhausted. The swap keeps its last
    /// checkpoint and can be resumed.
    #[error("stalled in {phase} after {attempts} attempts: {source}")]
    Stalled {
        phase: crate::phase::Phase,
        attempts: usize,
        source: Box<SwapError>,
    },
}

impl SwapError {
    /// Whether retrying the failed step may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Bitcoin(e) => e.is_transient(),
            Self::Monero(e) => e.is_transient(),
            Self::Transport(_) | Self::TimeoutBreach(_) => true,
            _ => false,
        }
    }
}

impl From<MoneroError> for SwapError {
    fn from(e: MoneroError) -> Self {
        match e {
            MoneroError::AmountMismatch { .. } => Self::ProtocolViolation(e.to_string()),
            other => Self::Monero(other),
        }
    }
}
