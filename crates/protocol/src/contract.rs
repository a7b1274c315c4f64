//! What both parties derive from the committed terms: the four spends of
//! the lock output and the joint Monero address.

use adaptor::monero_point_from_bytes;
use bitcoin::ScriptBuf;
use caravel_bitcoin::{BitcoinError, TxCancel, TxLock, TxPunish, TxRedeem, TxRefund};
use caravel_monero::PrivateViewKey;
use curve25519_dalek::edwards::CompressedEdwardsY;

use crate::error::SwapError;
use crate::types::SwapParameters;

/// Payout scripts fixed during negotiation.
#[derive(Clone, Debug)]
pub struct Payouts<'a> {
    pub redeem: &'a ScriptBuf,
    pub refund: &'a ScriptBuf,
    pub punish: &'a ScriptBuf,
}

/// The pre-signed spends, rebuilt bit-for-bit by either party.
#[derive(Clone, Debug)]
pub struct SwapTransactions {
    pub redeem: TxRedeem,
    pub cancel: TxCancel,
    pub refund: TxRefund,
    pub punish: TxPunish,
}

impl SwapTransactions {
    /// # Errors
    /// Returns `BitcoinError` if a spend cannot pay its fee.
    pub fn new(
        tx_lock: &TxLock,
        params: &SwapParameters,
        payouts: &Payouts<'_>,
    ) -> Result<Self, BitcoinError> {
        let cancel = TxCancel::new(tx_lock, params.cancel_timelock, &params.fee)?;
        Ok(Self {
            redeem: TxRedeem::new(tx_lock, payouts.redeem.clone(), &params.fee)?,
            refund: TxRefund::new(&cancel, payouts.refund.clone(), &params.fee)?,
            punish: TxPunish::new(
                &cancel,
                payouts.punish.clone(),
                params.punish_timelock,
                &params.fee,
            )?,
            cancel,
        })
    }
}

/// Address of the joint Monero output.
///
/// # Errors
/// Returns `SwapError::Crypto` for an invalid point and `SwapError::Monero`
/// if the address cannot be built.
pub fn joint_monero_address(
    network: monero::Network,
    s_a: &CompressedEdwardsY,
    s_b: &CompressedEdwardsY,
    view: &PrivateViewKey,
) -> Result<monero::Address, SwapError> {
    let s_a = monero_point_from_bytes(s_a.to_bytes())?;
    let s_b = monero_point_from_bytes(s_b.to_bytes())?;
    Ok(caravel_monero::joint_address(network, &s_a, &s_b, view)?)
}
