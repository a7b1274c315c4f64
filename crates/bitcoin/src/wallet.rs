//! Bitcoin wallet abstraction used by the swap state machine.

use async_trait::async_trait;
use bitcoin::{Address, Amount, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Confirmation status of a transaction as seen by the wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    /// Not in the mempool nor in the chain.
    Unseen,
    /// In the mempool, not yet mined.
    InMempool,
    /// Mined; `depth` is 1 for a transaction in the tip block.
    Confirmed { depth: u32 },
}

impl TxStatus {
    #[must_use]
    pub fn depth(&self) -> u32 {
        match self {
            Self::Confirmed { depth } => *depth,
            Self::Unseen | Self::InMempool => 0,
        }
    }

    #[must_use]
    pub fn is_confirmed_with(&self, confirmations: u32) -> bool {
        matches!(self, Self::Confirmed { depth } if *depth >= confirmations)
    }

    #[must_use]
    pub fn has_been_seen(&self) -> bool {
        !matches!(self, Self::Unseen)
    }

    #[must_use]
    pub fn blocks_left_until(&self, confirmations: u32) -> u32 {
        confirmations.saturating_sub(self.depth())
    }
}

/// Operations the swap needs from a Bitcoin wallet.
///
/// Implementations serialize their own UTXO selection and signing; callers
/// may share one wallet between concurrently running swaps.
#[async_trait]
pub trait BitcoinWallet: Send + Sync {
    /// Funds an unsigned transaction paying `amount` to `script_pubkey`.
    ///
    /// All inputs are segwit so the txid is fixed before signing.
    ///
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the wallet cannot cover
    /// amount plus fee.
    async fn build_tx(&self, script_pubkey: ScriptBuf, amount: Amount) -> Result<Transaction>;

    /// Returns the inputs of a built but unpublished `tx` to the spendable
    /// set.
    async fn release(&self, tx: &Transaction);

    /// Signs every wallet-owned input of `tx`.
    async fn sign(&self, tx: Transaction) -> Result<Transaction>;

    /// Publishes a fully signed transaction. Re-publishing a known
    /// transaction succeeds with the same txid.
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid>;

    async fn get_confirmations(&self, txid: Txid) -> Result<TxStatus>;

    async fn current_height(&self) -> Result<u32>;

    /// Fetches a transaction with its witness, if the wallet can see it.
    async fn get_transaction(&self, txid: Txid) -> Result<Option<Transaction>>;

    async fn new_address(&self) -> Result<Address>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_and_thresholds() {
        assert_eq!(TxStatus::Unseen.depth(), 0);
        assert_eq!(TxStatus::InMempool.depth(), 0);
        assert!(TxStatus::Confirmed { depth: 3 }.is_confirmed_with(3));
        assert!(!TxStatus::Confirmed { depth: 2 }.is_confirmed_with(3));
        assert_eq!(TxStatus::Confirmed { depth: 4 }.blocks_left_until(10), 6);
        assert_eq!(TxStatus::Confirmed { depth: 40 }.blocks_left_until(10), 0);
    }

    #[test]
    fn seen_states() {
        assert!(!TxStatus::Unseen.has_been_seen());
        assert!(TxStatus::InMempool.has_been_seen());
        assert!(TxStatus::Confirmed { depth: 1 }.has_been_seen());
    }
}
