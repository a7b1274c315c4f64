//! Monero side of a BTC/XMR swap.
//!
//! Joint spend and view keys, the joint address, and the three settlement
//! steps: the maker locks XMR to the joint address, the taker verifies the
//! lock, and whoever learns the other's key share sweeps.

use thiserror::Error;

pub mod amount;
pub mod keys;
pub mod rpc;
pub mod settlement;
pub mod wallet;

pub use amount::XmrAmount;
pub use keys::{
    build_joint_spend_key, joint_address, joint_public_spend_key, JointAccount, PrivateViewKey,
};
pub use rpc::WalletRpc;
pub use settlement::{lock_funds, sweep_funds, verify_lock, LockCheck};
pub use wallet::{MoneroWallet, TransferCheck, TransferProof, TxHash};

/// Errors that can occur in Monero settlement.
#[derive(Debug, Error)]
pub enum MoneroError {
    /// Error talking to monero-wallet-rpc.
    #[error("wallet rpc error: {0}")]
    Rpc(String),

    /// Key material failed to decode or combine.
    #[error("key error: {0}")]
    Key(String),

    /// The lock transfer does not pay the agreed amount.
    #[error("lock amount mismatch: expected {expected}, received {received}")]
    AmountMismatch {
        expected: XmrAmount,
        received: XmrAmount,
    },

    /// The wallet cannot cover a transfer.
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds {
        needed: XmrAmount,
        available: XmrAmount,
    },

    /// Refused to sweep before the disclosing Bitcoin transaction is buried.
    #[error("disclosure at depth {depth}, {required} required before sweeping")]
    PrematureSweep { depth: u32, required: u32 },

    #[error(transparent)]
    Crypto(#[from] adaptor::CryptoError),
}

impl MoneroError {
    /// Whether the operation may succeed if retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::PrematureSweep { .. })
    }
}

/// Result type for Monero settlement.
pub type Result<T> = std::result::Result<T, MoneroError>;
