//! Bitcoin side of a BTC/XMR swap.
//!
//! The joint 2-of-2 taproot output, the five swap transactions (lock,
//! redeem, cancel, refund, punish), relative timelock evaluation, fee policy,
//! the `BitcoinWallet` abstraction and an Esplora-backed implementation.

use bitcoin::{Amount, Txid};
use thiserror::Error;

pub mod cancel;
pub mod esplora;
pub mod esplora_wallet;
pub mod fee;
pub mod lock;
pub mod punish;
pub mod redeem;
pub mod refund;
pub mod spend;
pub mod taproot;
pub mod timelocks;
pub mod wallet;
pub mod watch;

pub use cancel::TxCancel;
pub use esplora::EsploraClient;
pub use esplora_wallet::EsploraWallet;
pub use fee::FeePolicy;
pub use lock::TxLock;
pub use punish::TxPunish;
pub use redeem::TxRedeem;
pub use refund::TxRefund;
pub use spend::JointSpend;
pub use timelocks::{expired_timelocks, CancelTimelock, ExpiredTimelocks, PunishTimelock};
pub use wallet::{BitcoinWallet, TxStatus};
pub use watch::{TxWatcher, WatchEvent};

/// Errors that can occur in bitcoin operations.
#[derive(Debug, Error)]
pub enum BitcoinError {
    /// Error in taproot construction or signing.
    #[error("taproot error: {0}")]
    Taproot(String),

    /// Error in transaction construction.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Error communicating with Esplora.
    #[error("esplora error: {0}")]
    Esplora(String),

    /// Error computing sighash.
    #[error("sighash error: {0}")]
    Sighash(String),

    /// The wallet or the spent output cannot cover amount plus fee.
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    /// A signature over a swap transaction did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A timelock value cannot be expressed as a relative height lock.
    #[error("invalid timelock: {0}")]
    Timelock(String),

    /// A watched transaction lost confirmations.
    #[error("reorg detected for {txid}: depth {previous} -> {current}")]
    ReorgDetected {
        txid: Txid,
        previous: u32,
        current: u32,
    },

    /// Crypto core failure while encrypting or decrypting a signature.
    #[error(transparent)]
    Crypto(#[from] adaptor::CryptoError),
}

impl BitcoinError {
    /// Whether the operation may succeed if retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Esplora(_) | Self::ReorgDetected { .. })
    }
}

/// Result type for bitcoin operations.
pub type Result<T> = std::result::Result<T, BitcoinError>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_taproot() {
        let err = BitcoinError::Taproot("invalid key".to_string());
        assert_eq!(err.to_string(), "taproot error: invalid key");
    }

    #[test]
    fn error_display_esplora() {
        let err = BitcoinError::Esplora("connection refused".to_string());
        assert_eq!(err.to_string(), "esplora error: connection refused");
    }

    #[test]
    fn error_display_insufficient_funds() {
        let err = BitcoinError::InsufficientFunds {
            needed: Amount::from_sat(2_000),
            available: Amount::from_sat(1_000),
        };
        assert!(err.to_string().starts_with("insufficient funds: needed"));
    }

    #[test]
    fn only_network_and_reorg_errors_are_transient() {
        assert!(BitcoinError::Esplora("timeout".into()).is_transient());
        assert!(!BitcoinError::Sighash("bad prevout".into()).is_transient());
        assert!(!BitcoinError::InsufficientFunds {
            needed: Amount::ONE_SAT,
            available: Amount::ZERO,
        }
        .is_transient());
    }
}
