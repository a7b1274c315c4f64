//! Lock, verify and sweep.

use tracing::{info, warn};

use crate::amount::XmrAmount;
use crate::keys::JointAccount;
use crate::wallet::{MoneroWallet, TransferProof, TxHash};
use crate::{MoneroError, Result};

/// State of a verified lock transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockCheck {
    pub confirmations: u64,
    pub in_pool: bool,
}

impl LockCheck {
    #[must_use]
    pub fn is_final(&self, required: u64) -> bool {
        !self.in_pool && self.confirmations >= required
    }
}

/// Maker pays the agreed amount to the joint address.
///
/// # Errors
/// Propagates wallet errors, including `MoneroError::InsufficientFunds`.
pub async fn lock_funds(
    wallet: &dyn MoneroWallet,
    address: &monero::Address,
    amount: XmrAmount,
) -> Result<TransferProof> {
    let proof = wallet.transfer(address, amount).await?;
    info!(tx_hash = %proof.tx_hash, %amount, "Locked Monero");
    Ok(proof)
}

/// Taker checks that `proof` pays exactly `expected` to the joint address.
///
/// # Errors
/// Returns `MoneroError::AmountMismatch` if a different amount arrived, and
/// propagates wallet errors.
pub async fn verify_lock(
    wallet: &dyn MoneroWallet,
    proof: &TransferProof,
    address: &monero::Address,
    expected: XmrAmount,
) -> Result<LockCheck> {
    let check = wallet
        .check_tx_key(&proof.tx_hash, &proof.tx_key, address)
        .await?;
    if check.received != expected {
        warn!(
            tx_hash = %proof.tx_hash,
            %expected,
            received = %check.received,
            "Lock transfer amount mismatch"
        );
        return Err(MoneroError::AmountMismatch {
            expected,
            received: check.received,
        });
    }
    Ok(LockCheck {
        confirmations: check.confirmations,
        in_pool: check.in_pool,
    })
}

/// Sweeps the joint output to `destination`.
///
/// `disclosure_depth` is the confirmation depth of the Bitcoin transaction
/// that revealed the missing key share; the sweep is refused until it
/// reaches `required_depth`.
///
/// # Errors
/// Returns `MoneroError::PrematureSweep` before the required depth and
/// propagates wallet errors.
pub async fn sweep_funds(
    wallet: &dyn MoneroWallet,
    account: &JointAccount,
    destination: &monero::Address,
    disclosure_depth: u32,
    required_depth: u32,
) -> Result<Vec<TxHash>> {
    if disclosure_depth < required_depth {
        return Err(MoneroError::PrematureSweep {
            depth: disclosure_depth,
            required: required_depth,
        });
    }
    wallet.create_account_from_key(account).await?;
    let hashes = wallet.sweep_all(destination).await?;
    info!(wallet = %account.name, txs = hashes.len(), "Swept joint output");
    Ok(hashes)
}
