//! Maker side of the key and signature exchange.

use std::time::SystemTime;

use adaptor::{dleq, generate_adaptor_keypair, monero_point_from_bytes};
use bitcoin::secp256k1::{SecretKey, SECP256K1};
use bitcoin::Amount;
use caravel_bitcoin::TxLock;
use caravel_monero::{MoneroError, PrivateViewKey};
use tracing::{info, warn};

use super::{AliceContext, AliceSetup, AliceState};
use crate::contract::{Payouts, SwapTransactions};
use crate::error::SwapError;
use crate::messages::{unexpected, Message, Message1, Message3, SwapResponse};
use crate::oracle::{PriceOracle, QuotePolicy};
use crate::retry::retry_with_timeout;
use crate::transport::recv_within;
use crate::types::{PublicShares, SwapParameters};

/// Answers a taker's request for `btc` and runs the exchange up to
/// `Committed`.
///
/// Any failure before commitment tells the taker and ends in `Aborted`.
///
/// # Errors
/// Only store failures are returned; everything else aborts the swap.
pub async fn negotiate(
    ctx: &mut AliceContext,
    btc: Amount,
    oracle: &dyn PriceOracle,
    policy: &QuotePolicy,
) -> Result<AliceState, SwapError> {
    ctx.persist(&AliceState::Negotiating { btc })?;

    let state = match exchange(ctx, btc, oracle, policy).await {
        Ok(setup) => AliceState::Committed {
            setup: Box::new(setup),
        },
        Err(e @ SwapError::Store(_)) => return Err(e),
        Err(e) => {
            warn!(swap_id = %ctx.swap_id, error = %e, "Negotiation failed");
            let reason = e.to_string();
            if let Err(e) = ctx.channel.send(Message::Abort { reason: reason.clone() }).await {
                warn!(error = %e, "Failed to tell taker about abort");
            }
            AliceState::Aborted { reason }
        }
    };
    ctx.persist(&state)?;
    Ok(state)
}

async fn exchange(
    ctx: &mut AliceContext,
    btc: Amount,
    oracle: &dyn PriceOracle,
    policy: &QuotePolicy,
) -> Result<AliceSetup, SwapError> {
    let deadline = ctx.config.negotiation_timeout;

    let retry = ctx.config.retry.clone();
    let quote = retry_with_timeout("price quote", &retry, move || oracle.quote()).await?;
    let (rate, xmr) = policy.price(&quote, btc, SystemTime::now())?;
    let monero = ctx.monero.clone();
    let available = retry_with_timeout("monero balance", &retry, || {
        let monero = monero.clone();
        async move { Ok(monero.get_balance().await?) }
    })
    .await?;
    if available < xmr {
        return Err(MoneroError::InsufficientFunds {
            needed: xmr,
            available,
        }
        .into());
    }

    let params = SwapParameters {
        btc,
        xmr,
        rate,
        cancel_timelock: ctx.config.cancel_timelock,
        punish_timelock: ctx.config.punish_timelock,
        fee: ctx.config.fee,
        bitcoin_network: ctx.config.bitcoin_network,
        monero_network: ctx.config.monero_network,
    };
    ctx.channel
        .send(Message::SwapResponse(Box::new(SwapResponse {
            params: params.clone(),
        })))
        .await?;

    let msg0 = match recv_within(&mut ctx.channel, deadline).await? {
        Message::Message0(msg) => msg,
        other => return Err(unexpected("message0", &other)),
    };
    if msg0.params != params {
        return Err(SwapError::ProtocolViolation(
            "taker changed the offered terms".into(),
        ));
    }
    let s_b_point = monero_point_from_bytes(msg0.s_b_monero.to_bytes())?;
    if !dleq::verify(&msg0.dleq_proof, &msg0.s_b_bitcoin, &s_b_point) {
        return Err(SwapError::ProtocolViolation(
            "taker key shares are not linked".into(),
        ));
    }
    let refund_address = msg0
        .refund_address
        .clone()
        .require_network(params.bitcoin_network)
        .map_err(|e| SwapError::ProtocolViolation(format!("refund address: {e}")))?;

    let (a, s_a, v_a, dleq_proof) = {
        let mut rng = rand::thread_rng();
        let s_a = generate_adaptor_keypair(&mut rng);
        let dleq_proof = s_a.prove(&mut rng)?;
        (
            SecretKey::new(&mut rng),
            s_a,
            PrivateViewKey::new_random(&mut rng),
            dleq_proof,
        )
    };
    let redeem_address = ctx.bitcoin.new_address().await?;
    let punish_address = ctx.bitcoin.new_address().await?;

    let shares = PublicShares {
        key: a.public_key(SECP256K1),
        s_bitcoin: s_a.bitcoin_point(),
        s_monero: s_a.monero_point_compressed(),
    };
    let commitment = params
        .commitment(&shares, &msg0.shares())
        .map_err(|e| SwapError::ProtocolViolation(format!("commitment: {e}")))?;
    let msg1 = Message1 {
        a: a.public_key(SECP256K1),
        s_a_bitcoin: s_a.bitcoin_point(),
        s_a_monero: s_a.monero_point_compressed(),
        dleq_proof,
        v_a: v_a.clone(),
        redeem_address: redeem_address.as_unchecked().clone(),
        punish_address: punish_address.as_unchecked().clone(),
        commitment,
    };
    ctx.channel.send(Message::Message1(Box::new(msg1))).await?;

    let msg2 = match recv_within(&mut ctx.channel, deadline).await? {
        Message::Message2(msg) => msg,
        other => return Err(unexpected("message2", &other)),
    };
    let tx_lock = TxLock::from_transaction(
        msg2.tx_lock.into_transaction(),
        params.btc,
        a.public_key(SECP256K1),
        msg0.b,
        params.bitcoin_network,
    )?;

    let redeem_script = redeem_address.script_pubkey();
    let punish_script = punish_address.script_pubkey();
    let refund_script = refund_address.script_pubkey();
    let txs = SwapTransactions::new(
        &tx_lock,
        &params,
        &Payouts {
            redeem: &redeem_script,
            refund: &refund_script,
            punish: &punish_script,
        },
    )?;
    let tx_refund_encsig = txs.refund.encsign(&a, &msg0.s_b_bitcoin)?;
    ctx.channel
        .send(Message::Message3(Box::new(Message3 {
            tx_cancel_sig: txs.cancel.sign(&a)?,
            tx_refund_encsig: tx_refund_encsig.clone(),
        })))
        .await?;

    let msg4 = match recv_within(&mut ctx.channel, deadline).await? {
        Message::Message4(msg) => msg,
        other => return Err(unexpected("message4", &other)),
    };
    txs.cancel.verify_signature(&msg0.b, &msg4.tx_cancel_sig)?;
    txs.punish.verify_signature(&msg0.b, &msg4.tx_punish_sig)?;

    info!(
        swap_id = %ctx.swap_id,
        %btc,
        %xmr,
        lock_txid = %tx_lock.txid(),
        "Swap committed"
    );
    Ok(AliceSetup {
        params,
        a,
        s_a,
        v_a,
        b: msg0.b,
        s_b_bitcoin: msg0.s_b_bitcoin,
        s_b_monero: msg0.s_b_monero,
        v_b: msg0.v_b.clone(),
        redeem_address: redeem_script,
        punish_address: punish_script,
        refund_address: refund_script,
        tx_lock,
        tx_refund_encsig,
        tx_cancel_sig_bob: msg4.tx_cancel_sig,
        tx_punish_sig_bob: msg4.tx_punish_sig,
    })
}
