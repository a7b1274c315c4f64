//! Messages exchanged between maker and taker.
//!
//! Negotiation runs `SwapRequest`, `SwapResponse`, then `Message0` to
//! `Message4`. After that the maker sends a `TransferProof` for the Monero
//! lock and the taker answers with the encrypted redeem signature.

use adaptor::{CrossCurveProof, EncryptedSignature};
use bitcoin::address::NetworkUnchecked;
use bitcoin::secp256k1::{schnorr::Signature, PublicKey};
use bitcoin::Amount;
use caravel_bitcoin::TxLock;
use caravel_monero::{PrivateViewKey, TransferProof};
use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Serialize};

use crate::error::SwapError;
use crate::types::{Commitment, PublicShares, SwapParameters};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapRequest {
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub btc: Amount,
}

/// The maker's quote turned into full terms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapResponse {
    pub params: SwapParameters,
}

/// Taker's key material, echoing the terms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message0 {
    pub params: SwapParameters,
    pub b: PublicKey,
    pub s_b_bitcoin: PublicKey,
    pub s_b_monero: CompressedEdwardsY,
    pub dleq_proof: CrossCurveProof,
    pub v_b: PrivateViewKey,
    pub refund_address: bitcoin::Address<NetworkUnchecked>,
}

impl Message0 {
    #[must_use]
    pub fn shares(&self) -> PublicShares {
        PublicShares {
            key: self.b,
            s_bitcoin: self.s_b_bitcoin,
            s_monero: self.s_b_monero,
        }
    }
}

/// Maker's key material and payout addresses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message1 {
    pub a: PublicKey,
    pub s_a_bitcoin: PublicKey,
    pub s_a_monero: CompressedEdwardsY,
    pub dleq_proof: CrossCurveProof,
    pub v_a: PrivateViewKey,
    pub redeem_address: bitcoin::Address<NetworkUnchecked>,
    pub punish_address: bitcoin::Address<NetworkUnchecked>,
    pub commitment: Commitment,
}

impl Message1 {
    #[must_use]
    pub fn shares(&self) -> PublicShares {
        PublicShares {
            key: self.a,
            s_bitcoin: self.s_a_bitcoin,
            s_monero: self.s_a_monero,
        }
    }
}

/// The unsigned lock transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message2 {
    pub tx_lock: TxLock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message3 {
    pub tx_cancel_sig: Signature,
    /// Maker's refund signature, encrypted under the taker's adaptor point.
    pub tx_refund_encsig: EncryptedSignature,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message4 {
    pub tx_punish_sig: Signature,
    pub tx_cancel_sig: Signature,
}

/// Taker's redeem signature, encrypted under the maker's adaptor point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedeemEncsig {
    pub tx_redeem_encsig: EncryptedSignature,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Message {
    SwapRequest(SwapRequest),
    SwapResponse(Box<SwapResponse>),
    Message0(Box<Message0>),
    Message1(Box<Message1>),
    Message2(Box<Message2>),
    Message3(Box<Message3>),
    Message4(Box<Message4>),
    TransferProof(TransferProof),
    EncryptedSignature(Box<RedeemEncsig>),
    Abort { reason: String },
}

impl Message {
    /// Position in the protocol, used as the envelope sequence number.
    ///
    /// Re-sending a message after a restart reuses its number, so the
    /// receiver drops the copy.
    #[must_use]
    pub fn ordinal(&self) -> u64 {
        match self {
            Self::SwapRequest(_) => 1,
            Self::SwapResponse(_) => 2,
            Self::Message0(_) => 3,
            Self::Message1(_) => 4,
            Self::Message2(_) => 5,
            Self::Message3(_) => 6,
            Self::Message4(_) => 7,
            Self::TransferProof(_) => 8,
            Self::EncryptedSignature(_) => 9,
            Self::Abort { .. } => u64::MAX,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SwapRequest(_) => "swap_request",
            Self::SwapResponse(_) => "swap_response",
            Self::Message0(_) => "message0",
            Self::Message1(_) => "message1",
            Self::Message2(_) => "message2",
            Self::Message3(_) => "message3",
            Self::Message4(_) => "message4",
            Self::TransferProof(_) => "transfer_proof",
            Self::EncryptedSignature(_) => "encrypted_signature",
            Self::Abort { .. } => "abort",
        }
    }
}

pub(crate) fn unexpected(expected: &str, received: &Message) -> SwapError {
    SwapError::ProtocolViolation(format!(
        "expected {expected}, received {}",
        received.name()
    ))
}
