//! Maker state transitions after negotiation.

use std::sync::Arc;

use caravel_bitcoin::watch::wait_for_confirmations;
use caravel_bitcoin::{BitcoinWallet, TxWatcher, WatchEvent};
use caravel_monero::{lock_funds, sweep_funds, MoneroWallet};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{AliceSetup, AliceState};
use crate::chain::{
    current_epoch, publish, wait_for_cancel_expiry, wait_for_punish_expiry,
    wait_for_transaction,
};
use crate::error::SwapError;
use crate::messages::Message;
use crate::store::{SwapStore, Transition};
use crate::swap::Swap;
use crate::transport::SwapChannel;
use crate::types::{SwapConfig, SwapId};

/// What a running maker swap works with.
pub struct AliceContext {
    pub swap_id: SwapId,
    pub bitcoin: Arc<dyn BitcoinWallet>,
    pub monero: Arc<dyn MoneroWallet>,
    pub store: Arc<dyn SwapStore>,
    pub channel: SwapChannel,
    pub config: SwapConfig,
}

impl AliceContext {
    pub(crate) fn persist(&self, state: &AliceState) -> Result<(), SwapError> {
        self.store
            .append(self.swap_id, &Transition::new(Swap::Alice(state.clone())))?;
        info!(
            swap_id = %self.swap_id,
            phase = %state.phase(),
            state = state.name(),
            "Advanced swap"
        );
        Ok(())
    }
}

/// Drives the swap to a terminal state.
///
/// # Errors
/// Returns `SwapError::Stalled` once retries of a transient failure run
/// out, or a permanent error that has no fallback state.
pub async fn run(ctx: &mut AliceContext, state: AliceState) -> Result<AliceState, SwapError> {
    run_until(ctx, state, |_| false).await
}

/// Drives the swap until `stop` holds or a terminal state is reached.
///
/// Every new state is persisted before the next step runs.
///
/// # Errors
/// See [`run`].
pub async fn run_until(
    ctx: &mut AliceContext,
    mut state: AliceState,
    stop: fn(&AliceState) -> bool,
) -> Result<AliceState, SwapError> {
    let mut attempt = 0;
    while !state.is_complete() && !stop(&state) {
        match step(ctx, state.clone()).await {
            Ok(next) => {
                attempt = 0;
                ctx.persist(&next)?;
                state = next;
            }
            Err(e) if e.is_transient() => {
                if attempt >= ctx.config.retry.max_retries {
                    return Err(SwapError::Stalled {
                        phase: state.phase(),
                        attempts: attempt + 1,
                        source: Box::new(e),
                    });
                }
                warn!(
                    swap_id = %ctx.swap_id,
                    state = state.name(),
                    error = %e,
                    "Step failed; retrying"
                );
                sleep(ctx.config.retry.backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => match state.on_fatal(&e) {
                Some(next) => {
                    warn!(swap_id = %ctx.swap_id, error = %e, "Swap failed; abandoning");
                    ctx.persist(&next)?;
                    state = next;
                }
                None => return Err(e),
            },
        }
    }
    Ok(state)
}

async fn step(ctx: &mut AliceContext, state: AliceState) -> Result<AliceState, SwapError> {
    let bitcoin = ctx.bitcoin.clone();
    let monero = ctx.monero.clone();
    let poll = ctx.config.poll_interval;
    let finality = ctx.config.bitcoin_finality;

    let next = match state {
        AliceState::Negotiating { .. } => AliceState::Aborted {
            reason: "negotiation interrupted".into(),
        },
        AliceState::Committed { setup } => {
            let txid = setup.tx_lock.txid();
            let seen = timeout(
                ctx.config.lock_seen_timeout,
                wait_for_transaction(bitcoin.as_ref(), txid, poll),
            )
            .await;
            match seen {
                Err(_) => AliceState::Aborted {
                    reason: format!("lock transaction {txid} never appeared"),
                },
                Ok(seen) => {
                    seen?;
                    wait_for_confirmations(bitcoin.as_ref(), txid, finality, poll).await?;
                    AliceState::BtcLocked { setup }
                }
            }
        }
        AliceState::BtcLocked { setup } => {
            let txs = setup.transactions()?;
            let epoch = current_epoch(bitcoin.as_ref(), &txs, &setup.params).await?;
            if epoch.cancel_expired() {
                AliceState::Aborted {
                    reason: "cancel timelock expired before Monero was locked".into(),
                }
            } else {
                let monero_height = monero.block_height().await?;
                AliceState::XmrLockInFlight {
                    setup,
                    monero_height,
                }
            }
        }
        AliceState::XmrLockInFlight {
            setup,
            monero_height,
        } => {
            let address = setup.joint_address()?;
            let xmr = setup.params.xmr;
            let transfer_proof = match monero
                .find_outgoing_transfer(&address, xmr, monero_height)
                .await?
            {
                Some(proof) => {
                    info!(tx_hash = %proof.tx_hash, "Found Monero lock made before restart");
                    proof
                }
                None => lock_funds(monero.as_ref(), &address, xmr).await?,
            };
            AliceState::XmrLocked {
                setup,
                transfer_proof,
                monero_height,
            }
        }
        AliceState::XmrLocked {
            setup,
            transfer_proof,
            monero_height,
        } => {
            if let Err(e) = ctx
                .channel
                .send(Message::TransferProof(transfer_proof.clone()))
                .await
            {
                warn!(error = %e, "Failed to send transfer proof");
            }
            match wait_for_encsig(ctx, &setup).await? {
                Some(encsig) => AliceState::EncSigLearned {
                    setup,
                    transfer_proof,
                    monero_height,
                    encsig,
                },
                None => AliceState::CancelTimelockExpired {
                    setup,
                    transfer_proof,
                    monero_height,
                },
            }
        }
        AliceState::EncSigLearned {
            setup,
            transfer_proof,
            monero_height,
            encsig,
        } => {
            let txs = setup.transactions()?;
            let epoch = current_epoch(bitcoin.as_ref(), &txs, &setup.params).await?;
            if epoch.cancel_expired() {
                warn!("Cancel timelock expired before redeeming");
                AliceState::CancelTimelockExpired {
                    setup,
                    transfer_proof,
                    monero_height,
                }
            } else {
                let sig_b = adaptor::decrypt_signature(&encsig, setup.s_a.secret())?;
                let sig_a = txs.redeem.sign(&setup.a)?;
                let tx_redeem = txs.redeem.complete(&sig_a, &sig_b)?;
                AliceState::RedeemBroadcast {
                    setup,
                    transfer_proof,
                    monero_height,
                    tx_redeem,
                }
            }
        }
        AliceState::RedeemBroadcast {
            setup,
            transfer_proof,
            monero_height,
            tx_redeem,
        } => {
            let txs = setup.transactions()?;
            let txid = tx_redeem.compute_txid();
            let mut watcher = TxWatcher::new(txid, finality);
            let mut ticker = interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match watcher.poll(bitcoin.as_ref()).await? {
                    WatchEvent::Confirmed { .. } => {
                        break AliceState::BtcRedeemed { redeem_txid: txid };
                    }
                    WatchEvent::Unseen => {
                        let cancel = bitcoin.get_confirmations(txs.cancel.txid()).await?;
                        if cancel.has_been_seen() {
                            warn!("TxCancel published before redeem confirmed");
                            break AliceState::BtcCancelled {
                                setup,
                                transfer_proof,
                                monero_height,
                            };
                        }
                        publish(bitcoin.as_ref(), &tx_redeem).await?;
                    }
                    event => debug!(%txid, ?event, "Waiting for redeem"),
                }
            }
        }
        AliceState::CancelTimelockExpired {
            setup,
            transfer_proof,
            monero_height,
        } => {
            let txs = setup.transactions()?;
            let sig_a = txs.cancel.sign(&setup.a)?;
            let tx_cancel = txs.cancel.complete(&sig_a, &setup.tx_cancel_sig_bob)?;
            publish(bitcoin.as_ref(), &tx_cancel).await?;
            AliceState::BtcCancelled {
                setup,
                transfer_proof,
                monero_height,
            }
        }
        AliceState::BtcCancelled {
            setup,
            transfer_proof,
            monero_height,
        } => {
            let txs = setup.transactions()?;
            tokio::select! {
                biased;
                refund = wait_for_transaction(bitcoin.as_ref(), txs.refund.txid(), poll) => {
                    let refund = refund?;
                    let sig_a = txs.refund.extract_signature_by_key(&refund, &setup.a_public())?;
                    let s_b = adaptor::recover_secret(&sig_a, &setup.tx_refund_encsig)?;
                    info!(txid = %txs.refund.txid(), "Taker refunded; recovered their key share");
                    AliceState::BtcRefunded {
                        s_b: adaptor::derive_monero_spend_component(&s_b)?,
                        refund_txid: txs.refund.txid(),
                        setup,
                        monero_height,
                    }
                }
                expired = wait_for_punish_expiry(bitcoin.as_ref(), &txs, &setup.params, poll) => {
                    expired?;
                    AliceState::BtcPunishable {
                        setup,
                        transfer_proof,
                        monero_height,
                    }
                }
            }
        }
        AliceState::BtcRefunded {
            setup,
            monero_height,
            s_b,
            refund_txid,
        } => {
            let depth =
                wait_for_confirmations(bitcoin.as_ref(), refund_txid, finality, poll).await?;
            let account = setup.refund_account(ctx.swap_id, &s_b, monero_height)?;
            let destination = monero.main_address().await?;
            let sweep_txs =
                sweep_funds(monero.as_ref(), &account, &destination, depth, finality).await?;
            AliceState::XmrRefunded { sweep_txs }
        }
        AliceState::BtcPunishable {
            setup,
            transfer_proof,
            monero_height,
        } => {
            let txs = setup.transactions()?;
            let refund = bitcoin.get_confirmations(txs.refund.txid()).await?;
            if refund.has_been_seen() {
                info!("Taker refunded at the last moment");
                AliceState::BtcCancelled {
                    setup,
                    transfer_proof,
                    monero_height,
                }
            } else {
                let sig_a = txs.punish.sign(&setup.a)?;
                let tx_punish = txs.punish.complete(&sig_a, &setup.tx_punish_sig_bob)?;
                let punish_txid = publish(bitcoin.as_ref(), &tx_punish).await?;
                wait_for_confirmations(bitcoin.as_ref(), punish_txid, finality, poll).await?;
                AliceState::BtcPunished { punish_txid }
            }
        }
        terminal @ (AliceState::BtcRedeemed { .. }
        | AliceState::XmrRefunded { .. }
        | AliceState::BtcPunished { .. }
        | AliceState::Aborted { .. }) => terminal,
    };
    Ok(next)
}

/// Waits for a valid redeem encsig from the taker, or `None` once the cancel
/// timelock expires. Invalid encsigs are logged and ignored.
async fn wait_for_encsig(
    ctx: &mut AliceContext,
    setup: &AliceSetup,
) -> Result<Option<adaptor::EncryptedSignature>, SwapError> {
    let bitcoin = ctx.bitcoin.clone();
    let txs = setup.transactions()?;
    let expiry = wait_for_cancel_expiry(
        bitcoin.as_ref(),
        &txs,
        &setup.params,
        ctx.config.poll_interval,
    );
    tokio::pin!(expiry);

    let mut listening = true;
    loop {
        tokio::select! {
            received = ctx.channel.recv(), if listening => match received {
                Ok(Message::EncryptedSignature(msg)) => {
                    let encsig = msg.tx_redeem_encsig;
                    match txs.redeem.verify_encsig(&setup.b, &setup.s_a.bitcoin_point(), &encsig) {
                        Ok(()) => return Ok(Some(encsig)),
                        Err(e) => warn!(error = %e, "Ignoring invalid redeem encsig"),
                    }
                }
                Ok(other) => debug!(message = other.name(), "Ignoring unexpected message"),
                Err(e) => {
                    warn!(error = %e, "Lost taker channel; waiting for cancel timelock");
                    listening = false;
                }
            },
            expired = &mut expiry => {
                expired?;
                return Ok(None);
            }
        }
    }
}
