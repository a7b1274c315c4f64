//! Taker state transitions after negotiation.

use std::sync::Arc;

use adaptor::EncryptedSignature;
use caravel_bitcoin::watch::wait_for_confirmations;
use caravel_bitcoin::BitcoinWallet;
use caravel_monero::{sweep_funds, verify_lock, MoneroWallet, TransferProof};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{BobSetup, BobState};
use crate::chain::{publish, wait_for_cancel_expiry, wait_for_transaction};
use crate::contract::SwapTransactions;
use crate::error::SwapError;
use crate::messages::{Message, RedeemEncsig};
use crate::store::{SwapStore, Transition};
use crate::swap::Swap;
use crate::transport::SwapChannel;
use crate::types::{SwapConfig, SwapId};

/// What a running taker swap works with.
pub struct BobContext {
    pub swap_id: SwapId,
    pub bitcoin: Arc<dyn BitcoinWallet>,
    pub monero: Arc<dyn MoneroWallet>,
    pub store: Arc<dyn SwapStore>,
    pub channel: SwapChannel,
    pub config: SwapConfig,
}

impl BobContext {
    pub(crate) fn persist(&self, state: &BobState) -> Result<(), SwapError> {
        self.store
            .append(self.swap_id, &Transition::new(Swap::Bob(state.clone())))?;
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
pub async fn run(ctx: &mut BobContext, state: BobState) -> Result<BobState, SwapError> {
    run_until(ctx, state, |_| false).await
}

/// Drives the swap until `stop` holds or a terminal state is reached.
///
/// # Errors
/// See [`run`].
pub async fn run_until(
    ctx: &mut BobContext,
    mut state: BobState,
    stop: fn(&BobState) -> bool,
) -> Result<BobState, SwapError> {
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
                    warn!(swap_id = %ctx.swap_id, error = %e, "Swap failed; falling back");
                    ctx.persist(&next)?;
                    state = next;
                }
                None => return Err(e),
            },
        }
    }
    Ok(state)
}

async fn step(ctx: &mut BobContext, state: BobState) -> Result<BobState, SwapError> {
    let bitcoin = ctx.bitcoin.clone();
    let monero = ctx.monero.clone();
    let poll = ctx.config.poll_interval;
    let finality = ctx.config.bitcoin_finality;

    let next = match state {
        BobState::Negotiating { .. } => BobState::Aborted {
            reason: "negotiation interrupted".into(),
        },
        BobState::Committed { setup } => {
            let txid = setup.tx_lock.txid();
            if !bitcoin.get_confirmations(txid).await?.has_been_seen() {
                let published = match bitcoin.sign(setup.tx_lock.transaction().clone()).await {
                    Ok(signed) => bitcoin.broadcast(&signed).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = published {
                    // A permanent failure aborts the swap.
                    if !e.is_transient() {
                        bitcoin.release(setup.tx_lock.transaction()).await;
                    }
                    return Err(e.into());
                }
                info!(%txid, amount = %setup.params.btc, "Published lock transaction");
            }
            wait_for_confirmations(bitcoin.as_ref(), txid, finality, poll).await?;
            BobState::BtcLocked { setup }
        }
        BobState::BtcLocked { setup } => {
            let txs = setup.transactions()?;
            match wait_for_transfer_proof(ctx, &setup, &txs).await? {
                Some(transfer_proof) => BobState::XmrLockProofReceived {
                    setup,
                    transfer_proof,
                },
                None => BobState::CancelTimelockExpired {
                    setup,
                    encsig: None,
                },
            }
        }
        BobState::XmrLockProofReceived {
            setup,
            transfer_proof,
        } => {
            let txs = setup.transactions()?;
            let verified = tokio::select! {
                biased;
                expired = wait_for_cancel_expiry(bitcoin.as_ref(), &txs, &setup.params, poll) => {
                    expired?;
                    None
                }
                verified = wait_for_final_lock(ctx, &setup, &transfer_proof) => Some(verified?),
            };
            match verified {
                Some(()) => BobState::XmrLocked {
                    setup,
                    transfer_proof,
                },
                None => BobState::CancelTimelockExpired {
                    setup,
                    encsig: None,
                },
            }
        }
        BobState::XmrLocked {
            setup,
            transfer_proof,
        } => {
            let txs = setup.transactions()?;
            let encsig = txs.redeem.encsign(&setup.b, &setup.s_a_bitcoin)?;
            BobState::EncSigSent {
                setup,
                transfer_proof,
                encsig,
            }
        }
        BobState::EncSigSent {
            setup,
            transfer_proof: _,
            encsig,
        } => {
            let txs = setup.transactions()?;
            if let Err(e) = ctx
                .channel
                .send(Message::EncryptedSignature(Box::new(RedeemEncsig {
                    tx_redeem_encsig: encsig.clone(),
                })))
                .await
            {
                warn!(error = %e, "Failed to send redeem encsig; watching the chain");
            }
            tokio::select! {
                biased;
                redeem = wait_for_transaction(bitcoin.as_ref(), txs.redeem.txid(), poll) => {
                    let redeem = redeem?;
                    redeemed(&setup, &txs, &redeem, &encsig)?
                }
                expired = wait_for_cancel_expiry(bitcoin.as_ref(), &txs, &setup.params, poll) => {
                    expired?;
                    match bitcoin.get_transaction(txs.redeem.txid()).await? {
                        Some(redeem) => redeemed(&setup, &txs, &redeem, &encsig)?,
                        None => BobState::CancelTimelockExpired {
                            setup,
                            encsig: Some(encsig),
                        },
                    }
                }
            }
        }
        BobState::BtcRedeemed {
            setup,
            s_a,
            redeem_txid,
        } => {
            let depth =
                wait_for_confirmations(bitcoin.as_ref(), redeem_txid, finality, poll).await?;
            let account = setup.claim_account(ctx.swap_id, &s_a)?;
            let destination = monero.main_address().await?;
            let sweep_txs =
                sweep_funds(monero.as_ref(), &account, &destination, depth, finality).await?;
            BobState::XmrSwept { sweep_txs }
        }
        BobState::WaitingForCancel { setup } => {
            let txs = setup.transactions()?;
            wait_for_cancel_expiry(bitcoin.as_ref(), &txs, &setup.params, poll).await?;
            BobState::CancelTimelockExpired {
                setup,
                encsig: None,
            }
        }
        BobState::CancelTimelockExpired { setup, encsig } => {
            let txs = setup.transactions()?;
            match redeem_won(bitcoin.as_ref(), &setup, &txs, encsig.as_ref()).await? {
                Some(redeemed) => redeemed,
                None => {
                    let sig_b = txs.cancel.sign(&setup.b)?;
                    let tx_cancel = txs.cancel.complete(&setup.tx_cancel_sig_alice, &sig_b)?;
                    publish(bitcoin.as_ref(), &tx_cancel).await?;
                    BobState::BtcCancelled { setup, encsig }
                }
            }
        }
        BobState::BtcCancelled { setup, encsig } => refund(ctx, setup, encsig).await?,
        terminal @ (BobState::XmrSwept { .. }
        | BobState::BtcRefunded { .. }
        | BobState::BtcPunished { .. }
        | BobState::Aborted { .. }) => terminal,
    };
    Ok(next)
}

/// Recovers the maker's key share from a published redeem.
fn redeemed(
    setup: &BobSetup,
    txs: &SwapTransactions,
    redeem: &bitcoin::Transaction,
    encsig: &EncryptedSignature,
) -> Result<BobState, SwapError> {
    let sig_b = txs.redeem.extract_signature_by_key(redeem, &setup.b_public())?;
    let s_a = adaptor::recover_secret(&sig_b, encsig)?;
    info!(txid = %txs.redeem.txid(), "Maker redeemed; recovered their key share");
    Ok(BobState::BtcRedeemed {
        setup: Box::new(setup.clone()),
        s_a: adaptor::derive_monero_spend_component(&s_a)?,
        redeem_txid: txs.redeem.txid(),
    })
}

/// Claims the swap through the maker's redeem if it spent the lock.
///
/// Only possible once the encsig has left, so without one there is nothing
/// to look for.
async fn redeem_won(
    bitcoin: &dyn BitcoinWallet,
    setup: &BobSetup,
    txs: &SwapTransactions,
    encsig: Option<&EncryptedSignature>,
) -> Result<Option<BobState>, SwapError> {
    let Some(encsig) = encsig else {
        return Ok(None);
    };
    match bitcoin.get_transaction(txs.redeem.txid()).await? {
        Some(redeem) => Ok(Some(redeemed(setup, txs, &redeem, encsig)?)),
        None => Ok(None),
    }
}

/// Publishes the refund and follows it to finality, unless the maker
/// punishes first or its redeem beat TxCancel.
async fn refund(
    ctx: &BobContext,
    setup: Box<BobSetup>,
    encsig: Option<EncryptedSignature>,
) -> Result<BobState, SwapError> {
    let bitcoin = ctx.bitcoin.as_ref();
    let txs = setup.transactions()?;
    let punish_txid = txs.punish.txid();

    if let Some(redeemed) = redeem_won(bitcoin, &setup, &txs, encsig.as_ref()).await? {
        warn!("Maker redeemed before TxCancel confirmed");
        return Ok(redeemed);
    }

    let punished = bitcoin.get_confirmations(punish_txid).await?;
    if punished.has_been_seen() {
        warn!(%punish_txid, "Maker punished before refund");
        return Ok(BobState::BtcPunished { punish_txid });
    }

    let sig_a = adaptor::decrypt_signature(&setup.tx_refund_encsig, setup.s_b.secret())?;
    let sig_b = txs.refund.sign(&setup.b)?;
    let tx_refund = txs.refund.complete(&sig_a, &sig_b)?;
    let refund_txid = tx_refund.compute_txid();

    let mut ticker = interval(ctx.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let status = bitcoin.get_confirmations(refund_txid).await?;
        if status.is_confirmed_with(ctx.config.bitcoin_finality) {
            return Ok(BobState::BtcRefunded { refund_txid });
        }
        if !status.has_been_seen() {
            if let Some(redeemed) = redeem_won(bitcoin, &setup, &txs, encsig.as_ref()).await? {
                warn!("Maker redeemed before TxCancel confirmed");
                return Ok(redeemed);
            }
            if bitcoin.get_confirmations(punish_txid).await?.has_been_seen() {
                warn!(%punish_txid, "Maker punished before refund");
                return Ok(BobState::BtcPunished { punish_txid });
            }
            publish(bitcoin, &tx_refund).await?;
        }
        debug!(%refund_txid, ?status, "Waiting for refund");
    }
}

/// Waits for the maker's transfer proof, or `None` once cancel is possible.
async fn wait_for_transfer_proof(
    ctx: &mut BobContext,
    setup: &BobSetup,
    txs: &SwapTransactions,
) -> Result<Option<TransferProof>, SwapError> {
    let bitcoin = ctx.bitcoin.clone();
    let expiry = wait_for_cancel_expiry(
        bitcoin.as_ref(),
        txs,
        &setup.params,
        ctx.config.poll_interval,
    );
    tokio::pin!(expiry);

    let mut listening = true;
    loop {
        tokio::select! {
            biased;
            expired = &mut expiry => {
                expired?;
                return Ok(None);
            }
            received = ctx.channel.recv(), if listening => match received {
                Ok(Message::TransferProof(proof)) => return Ok(Some(proof)),
                Ok(other) => debug!(message = other.name(), "Ignoring unexpected message"),
                Err(e) => {
                    warn!(error = %e, "Lost maker channel; waiting for cancel timelock");
                    listening = false;
                }
            },
        }
    }
}

/// Polls the Monero lock until it has the configured confirmations.
async fn wait_for_final_lock(
    ctx: &BobContext,
    setup: &BobSetup,
    proof: &TransferProof,
) -> Result<(), SwapError> {
    let address = setup.joint_address()?;
    let required = ctx.config.monero_finality;
    let mut ticker = interval(ctx.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match verify_lock(ctx.monero.as_ref(), proof, &address, setup.params.xmr).await {
            Ok(check) if check.is_final(required) => {
                info!(
                    tx_hash = %proof.tx_hash,
                    confirmations = check.confirmations,
                    "Monero lock final"
                );
                return Ok(());
            }
            Ok(check) => debug!(
                confirmations = check.confirmations,
                required,
                "Waiting for Monero lock"
            ),
            Err(e) if e.is_transient() => warn!(error = %e, "Failed to check Monero lock"),
            Err(e) => return Err(e.into()),
        }
    }
}
