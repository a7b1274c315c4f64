//! Taker side of the key and signature exchange.

use adaptor::{dleq, generate_adaptor_keypair, monero_point_from_bytes};
use bitcoin::secp256k1::{SecretKey, SECP256K1};
use bitcoin::Amount;
use caravel_bitcoin::TxLock;
use caravel_monero::PrivateViewKey;
use tracing::{info, warn};

use super::{BobContext, BobSetup, BobState};
use crate::contract::{Payouts, SwapTransactions};
use crate::error::SwapError;
use crate::messages::{unexpected, Message, Message0, Message2, Message4, SwapRequest};
use crate::retry::retry_with_timeout;
use crate::transport::recv_within;

/// Asks the maker for `btc` worth of XMR and runs the exchange up to
/// `Committed`.
///
/// # Errors
/// Only store failures are returned; everything else aborts the swap.
pub async fn negotiate(ctx: &mut BobContext, btc: Amount) -> Result<BobState, SwapError> {
    ctx.persist(&BobState::Negotiating { btc })?;

    let state = match exchange(ctx, btc).await {
        Ok(setup) => BobState::Committed {
            setup: Box::new(setup),
        },
        Err(e @ SwapError::Store(_)) => return Err(e),
        Err(e) => {
            warn!(swap_id = %ctx.swap_id, error = %e, "Negotiation failed");
            let reason = e.to_string();
            if let Err(e) = ctx.channel.send(Message::Abort { reason: reason.clone() }).await {
                warn!(error = %e, "Failed to tell maker about abort");
            }
            BobState::Aborted { reason }
        }
    };
    ctx.persist(&state)?;
    Ok(state)
}

async fn exchange(ctx: &mut BobContext, btc: Amount) -> Result<BobSetup, SwapError> {
    let deadline = ctx.config.negotiation_timeout;
    let monero = ctx.monero.clone();
    let monero_restore_height =
        retry_with_timeout("monero height", &ctx.config.retry, || {
            let monero = monero.clone();
            async move { Ok(monero.block_height().await?) }
        })
        .await?;

    ctx.channel
        .send(Message::SwapRequest(SwapRequest { btc }))
        .await?;
    let params = match recv_within(&mut ctx.channel, deadline).await? {
        Message::SwapResponse(response) => response.params,
        other => return Err(unexpected("swap_response", &other)),
    };
    if params.btc != btc {
        return Err(SwapError::ProtocolViolation(format!(
            "maker quoted for {} instead of {btc}",
            params.btc
        )));
    }
    if !ctx.config.accepts(&params) {
        return Err(SwapError::ProtocolViolation(
            "maker terms do not match local settings".into(),
        ));
    }
    if params.rate.xmr_for(btc) != Some(params.xmr) {
        return Err(SwapError::ProtocolViolation(
            "quoted amount does not follow the quoted rate".into(),
        ));
    }

    let (b, s_b, v_b, dleq_proof) = {
        let mut rng = rand::thread_rng();
        let s_b = generate_adaptor_keypair(&mut rng);
        let dleq_proof = s_b.prove(&mut rng)?;
        (
            SecretKey::new(&mut rng),
            s_b,
            PrivateViewKey::new_random(&mut rng),
            dleq_proof,
        )
    };
    let refund_address = ctx.bitcoin.new_address().await?;

    let msg0 = Message0 {
        params: params.clone(),
        b: b.public_key(SECP256K1),
        s_b_bitcoin: s_b.bitcoin_point(),
        s_b_monero: s_b.monero_point_compressed(),
        dleq_proof,
        v_b: v_b.clone(),
        refund_address: refund_address.as_unchecked().clone(),
    };
    let own_shares = msg0.shares();
    ctx.channel.send(Message::Message0(Box::new(msg0))).await?;

    let msg1 = match recv_within(&mut ctx.channel, deadline).await? {
        Message::Message1(msg) => msg,
        other => return Err(unexpected("message1", &other)),
    };
    let s_a_point = monero_point_from_bytes(msg1.s_a_monero.to_bytes())?;
    if !dleq::verify(&msg1.dleq_proof, &msg1.s_a_bitcoin, &s_a_point) {
        return Err(SwapError::ProtocolViolation(
            "maker key shares are not linked".into(),
        ));
    }
    let commitment = params
        .commitment(&msg1.shares(), &own_shares)
        .map_err(|e| SwapError::ProtocolViolation(format!("commitment: {e}")))?;
    if commitment != msg1.commitment {
        return Err(SwapError::ProtocolViolation(
            "maker commitment does not match the exchanged keys".into(),
        ));
    }
    let network = params.bitcoin_network;
    let redeem_address = msg1
        .redeem_address
        .clone()
        .require_network(network)
        .map_err(|e| SwapError::ProtocolViolation(format!("redeem address: {e}")))?;
    let punish_address = msg1
        .punish_address
        .clone()
        .require_network(network)
        .map_err(|e| SwapError::ProtocolViolation(format!("punish address: {e}")))?;

    let tx_lock = TxLock::new(
        ctx.bitcoin.as_ref(),
        params.btc,
        msg1.a,
        b.public_key(SECP256K1),
        network,
    )
    .await?;
    let redeem_script = redeem_address.script_pubkey();
    let punish_script = punish_address.script_pubkey();
    let refund_script = refund_address.script_pubkey();
    let payouts = Payouts {
        redeem: &redeem_script,
        refund: &refund_script,
        punish: &punish_script,
    };
    let signed = async {
        ctx.channel
            .send(Message::Message2(Box::new(Message2 {
                tx_lock: tx_lock.clone(),
            })))
            .await?;

        let msg3 = match recv_within(&mut ctx.channel, deadline).await? {
            Message::Message3(msg) => msg,
            other => return Err(unexpected("message3", &other)),
        };
        let txs = SwapTransactions::new(&tx_lock, &params, &payouts)?;
        txs.cancel.verify_signature(&msg1.a, &msg3.tx_cancel_sig)?;
        txs.refund
            .verify_encsig(&msg1.a, &s_b.bitcoin_point(), &msg3.tx_refund_encsig)?;

        ctx.channel
            .send(Message::Message4(Box::new(Message4 {
                tx_punish_sig: txs.punish.sign(&b)?,
                tx_cancel_sig: txs.cancel.sign(&b)?,
            })))
            .await?;
        Ok::<_, SwapError>(msg3)
    }
    .await;
    let msg3 = match signed {
        Ok(msg3) => msg3,
        Err(e) => {
            ctx.bitcoin.release(tx_lock.transaction()).await;
            return Err(e);
        }
    };

    info!(
        swap_id = %ctx.swap_id,
        %btc,
        xmr = %params.xmr,
        lock_txid = %tx_lock.txid(),
        "Swap committed"
    );
    Ok(BobSetup {
        params,
        b,
        s_b,
        v_b,
        a: msg1.a,
        s_a_bitcoin: msg1.s_a_bitcoin,
        s_a_monero: msg1.s_a_monero,
        v_a: msg1.v_a.clone(),
        redeem_address: redeem_script,
        punish_address: punish_script,
        refund_address: refund_script,
        tx_lock,
        tx_cancel_sig_alice: msg3.tx_cancel_sig,
        tx_refund_encsig: msg3.tx_refund_encsig.clone(),
        monero_restore_height,
    })
}
