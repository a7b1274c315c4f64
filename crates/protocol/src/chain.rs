//! Chain polling shared by both roles.

use std::time::Duration;

use bitcoin::{Transaction, Txid};
use caravel_bitcoin::{expired_timelocks, BitcoinWallet, ExpiredTimelocks};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::contract::SwapTransactions;
use crate::error::SwapError;
use crate::types::SwapParameters;

/// Broadcasts `tx` unless a copy with the same txid is already known.
///
/// The pre-signed spends carry fresh signatures each time they are
/// completed, so a second broadcast would conflict on witness.
pub(crate) async fn publish(
    wallet: &dyn BitcoinWallet,
    tx: &Transaction,
) -> Result<Txid, SwapError> {
    let txid = tx.compute_txid();
    if wallet.get_confirmations(txid).await?.has_been_seen() {
        debug!(%txid, "Transaction already known");
        return Ok(txid);
    }
    let txid = wallet.broadcast(tx).await?;
    info!(%txid, "Published transaction");
    Ok(txid)
}

/// Current timelock epoch of the lock output.
pub(crate) async fn current_epoch(
    wallet: &dyn BitcoinWallet,
    txs: &SwapTransactions,
    params: &SwapParameters,
) -> Result<ExpiredTimelocks, SwapError> {
    let lock = wallet
        .get_confirmations(txs.cancel.spent_outpoint().txid)
        .await?;
    let cancel = wallet.get_confirmations(txs.cancel.txid()).await?;
    Ok(expired_timelocks(
        params.cancel_timelock,
        params.punish_timelock,
        lock,
        cancel,
    ))
}

/// Resolves once TxCancel may be published.
pub(crate) async fn wait_for_cancel_expiry(
    wallet: &dyn BitcoinWallet,
    txs: &SwapTransactions,
    params: &SwapParameters,
    poll: Duration,
) -> Result<(), SwapError> {
    wait_for_epoch(wallet, txs, params, poll, ExpiredTimelocks::cancel_expired).await
}

/// Resolves once TxPunish may be published.
pub(crate) async fn wait_for_punish_expiry(
    wallet: &dyn BitcoinWallet,
    txs: &SwapTransactions,
    params: &SwapParameters,
    poll: Duration,
) -> Result<(), SwapError> {
    wait_for_epoch(wallet, txs, params, poll, |epoch| {
        matches!(epoch, ExpiredTimelocks::Punish)
    })
    .await
}

/// Re-evaluates the epoch on every new block height until `reached` holds.
async fn wait_for_epoch(
    wallet: &dyn BitcoinWallet,
    txs: &SwapTransactions,
    params: &SwapParameters,
    poll: Duration,
    reached: fn(&ExpiredTimelocks) -> bool,
) -> Result<(), SwapError> {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_height = None;
    loop {
        ticker.tick().await;
        let height = match wallet.current_height().await {
            Ok(height) => height,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Failed to read chain height");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if last_height == Some(height) {
            continue;
        }

        match current_epoch(wallet, txs, params).await {
            Ok(epoch) if reached(&epoch) => return Ok(()),
            Ok(epoch) => debug!(height, ?epoch, "Timelock not expired"),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Failed to evaluate timelocks");
                continue;
            }
            Err(e) => return Err(e),
        }
        last_height = Some(height);
    }
}

/// Polls until the wallet can see `txid`, in the mempool or in a block.
pub(crate) async fn wait_for_transaction(
    wallet: &dyn BitcoinWallet,
    txid: Txid,
    poll: Duration,
) -> Result<Transaction, SwapError> {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match wallet.get_transaction(txid).await {
            Ok(Some(tx)) => return Ok(tx),
            Ok(None) => {}
            Err(e) if e.is_transient() => warn!(%txid, error = %e, "Failed to fetch transaction"),
            Err(e) => return Err(e.into()),
        }
    }
}
