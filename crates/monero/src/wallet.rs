//! Monero wallet seam used by the settlement steps.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::amount::XmrAmount;
use crate::keys::JointAccount;
use crate::Result;

/// Hex-encoded Monero transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof that a transfer to the joint address was made.
///
/// The transaction key lets anyone holding the recipient address check the
/// amount received without the view key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProof {
    pub tx_hash: TxHash,
    pub tx_key: String,
}

/// Result of checking a transfer with its transaction key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferCheck {
    pub received: XmrAmount,
    pub confirmations: u64,
    pub in_pool: bool,
}

#[async_trait]
pub trait MoneroWallet: Send + Sync {
    /// Creates a wallet for `account` from its keys and makes it current.
    async fn create_account_from_key(&self, account: &JointAccount) -> Result<()>;

    /// Pays `amount` to `address` from the main wallet.
    async fn transfer(&self, address: &monero::Address, amount: XmrAmount)
        -> Result<TransferProof>;

    /// Sweeps the current wallet to `address`, then reopens the main wallet.
    async fn sweep_all(&self, address: &monero::Address) -> Result<Vec<TxHash>>;

    /// Primary address of the main wallet, where sweeps are sent.
    async fn main_address(&self) -> Result<monero::Address>;

    /// Unlocked balance of the main wallet.
    async fn get_balance(&self) -> Result<XmrAmount>;

    async fn block_height(&self) -> Result<u64>;

    async fn check_tx_key(
        &self,
        tx_hash: &TxHash,
        tx_key: &str,
        address: &monero::Address,
    ) -> Result<TransferCheck>;

    /// Looks for an outgoing transfer of `amount` to `address` made at or
    /// after `since_height`.
    async fn find_outgoing_transfer(
        &self,
        address: &monero::Address,
        amount: XmrAmount,
        since_height: u64,
    ) -> Result<Option<TransferProof>>;
}
