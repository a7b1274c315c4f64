//! Taker role: buys XMR with BTC.

use adaptor::{AdaptorKeyPair, EncryptedSignature, XmrKeyShare};
use bitcoin::secp256k1::{schnorr::Signature, PublicKey, SecretKey, SECP256K1};
use bitcoin::{Amount, ScriptBuf, Txid};
use caravel_bitcoin::TxLock;
use caravel_monero::{JointAccount, PrivateViewKey, TransferProof, TxHash};
use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Serialize};

use crate::contract::{joint_monero_address, Payouts, SwapTransactions};
use crate::error::SwapError;
use crate::phase::Phase;
use crate::types::{SwapId, SwapParameters};

mod negotiation;
mod swap;

pub use negotiation::negotiate;
pub use swap::{run, run_until, BobContext};

/// Everything the taker holds once both parties committed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BobSetup {
    pub params: SwapParameters,
    pub b: SecretKey,
    pub s_b: AdaptorKeyPair,
    pub v_b: PrivateViewKey,
    pub a: PublicKey,
    pub s_a_bitcoin: PublicKey,
    pub s_a_monero: CompressedEdwardsY,
    pub v_a: PrivateViewKey,
    pub redeem_address: ScriptBuf,
    pub punish_address: ScriptBuf,
    pub refund_address: ScriptBuf,
    pub tx_lock: TxLock,
    pub tx_cancel_sig_alice: Signature,
    /// Maker's refund signature, decryptable with `s_b`.
    pub tx_refund_encsig: EncryptedSignature,
    /// Monero height before the maker could have locked.
    pub monero_restore_height: u64,
}

impl BobSetup {
    #[must_use]
    pub fn b_public(&self) -> PublicKey {
        self.b.public_key(SECP256K1)
    }

    /// # Errors
    /// Returns `SwapError::Bitcoin` if a spend cannot be built.
    pub fn transactions(&self) -> Result<SwapTransactions, SwapError> {
        let payouts = Payouts {
            redeem: &self.redeem_address,
            refund: &self.refund_address,
            punish: &self.punish_address,
        };
        Ok(SwapTransactions::new(&self.tx_lock, &self.params, &payouts)?)
    }

    #[must_use]
    pub fn view_key(&self) -> PrivateViewKey {
        self.v_a.combine(&self.v_b)
    }

    /// # Errors
    /// Returns an error if a key share does not decode.
    pub fn joint_address(&self) -> Result<monero::Address, SwapError> {
        joint_monero_address(
            self.params.monero_network,
            &self.s_a_monero,
            &self.s_b.monero_point_compressed(),
            &self.view_key(),
        )
    }

    /// Wallet account for claiming the joint output once `s_a` is known.
    ///
    /// # Errors
    /// Returns `SwapError::Monero` if the keys do not convert.
    pub fn claim_account(
        &self,
        swap_id: SwapId,
        s_a: &XmrKeyShare,
    ) -> Result<JointAccount, SwapError> {
        Ok(JointAccount::new(
            format!("swap-{swap_id}"),
            self.params.monero_network,
            s_a,
            self.s_b.xmr_share(),
            &self.view_key(),
            self.monero_restore_height,
        )?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BobState {
    Negotiating {
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        btc: Amount,
    },
    Committed {
        setup: Box<BobSetup>,
    },
    BtcLocked {
        setup: Box<BobSetup>,
    },
    XmrLockProofReceived {
        setup: Box<BobSetup>,
        transfer_proof: TransferProof,
    },
    XmrLocked {
        setup: Box<BobSetup>,
        transfer_proof: TransferProof,
    },
    /// The encsig is recorded before it is first sent and resent unchanged.
    EncSigSent {
        setup: Box<BobSetup>,
        transfer_proof: TransferProof,
        encsig: EncryptedSignature,
    },
    BtcRedeemed {
        setup: Box<BobSetup>,
        s_a: XmrKeyShare,
        redeem_txid: Txid,
    },
    XmrSwept {
        sweep_txs: Vec<TxHash>,
    },
    /// Nothing more to expect from the maker; waiting to cancel.
    WaitingForCancel {
        setup: Box<BobSetup>,
    },
    CancelTimelockExpired {
        setup: Box<BobSetup>,
        encsig: Option<EncryptedSignature>,
    },
    /// Keeps the encsig so a redeem that wins against TxCancel still
    /// yields the maker's key share.
    BtcCancelled {
        setup: Box<BobSetup>,
        encsig: Option<EncryptedSignature>,
    },
    BtcRefunded {
        refund_txid: Txid,
    },
    BtcPunished {
        punish_txid: Txid,
    },
    Aborted {
        reason: String,
    },
}

impl BobState {
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Negotiating { .. } => Phase::Negotiating,
            Self::Committed { .. } => Phase::Committed,
            Self::BtcLocked { .. } | Self::XmrLockProofReceived { .. } => Phase::BtcLocked,
            Self::XmrLocked { .. } | Self::EncSigSent { .. } => Phase::XmrLocked,
            Self::BtcRedeemed { .. } => Phase::RedeemBroadcast,
            Self::XmrSwept { .. } => Phase::XmrSwept,
            Self::WaitingForCancel { .. }
            | Self::CancelTimelockExpired { .. }
            | Self::BtcCancelled { .. } => Phase::Cancelling,
            Self::BtcRefunded { .. } => Phase::Refunded,
            Self::BtcPunished { .. } => Phase::Punished,
            Self::Aborted { .. } => Phase::Aborted,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Negotiating { .. } => "negotiating",
            Self::Committed { .. } => "committed",
            Self::BtcLocked { .. } => "btc_locked",
            Self::XmrLockProofReceived { .. } => "xmr_lock_proof_received",
            Self::XmrLocked { .. } => "xmr_locked",
            Self::EncSigSent { .. } => "enc_sig_sent",
            Self::BtcRedeemed { .. } => "btc_redeemed",
            Self::XmrSwept { .. } => "xmr_swept",
            Self::WaitingForCancel { .. } => "waiting_for_cancel",
            Self::CancelTimelockExpired { .. } => "cancel_timelock_expired",
            Self::BtcCancelled { .. } => "btc_cancelled",
            Self::BtcRefunded { .. } => "btc_refunded",
            Self::BtcPunished { .. } => "btc_punished",
            Self::Aborted { .. } => "aborted",
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Where a permanent failure leads, if anywhere.
    ///
    /// Before the lock is published the swap is abandoned. Once bitcoin is
    /// locked and no redeem encsig has left, the only safe way out is the
    /// cancel path.
    #[must_use]
    pub fn on_fatal(&self, error: &SwapError) -> Option<Self> {
        match self {
            Self::Negotiating { .. } | Self::Committed { .. } => Some(Self::Aborted {
                reason: error.to_string(),
            }),
            Self::BtcLocked { setup }
            | Self::XmrLockProofReceived { setup, .. }
            | Self::XmrLocked { setup, .. } => Some(Self::WaitingForCancel {
                setup: setup.clone(),
            }),
            _ => None,
        }
    }
}

pub fn is_enc_sig_sent(state: &BobState) -> bool {
    matches!(state, BobState::EncSigSent { .. })
}

pub fn is_btc_locked(state: &BobState) -> bool {
    matches!(state, BobState::BtcLocked { .. })
}
