//! Maker role: sells XMR for BTC.

use adaptor::{AdaptorKeyPair, EncryptedSignature, XmrKeyShare};
use bitcoin::secp256k1::{schnorr::Signature, PublicKey, SecretKey, SECP256K1};
use bitcoin::{Amount, ScriptBuf, Transaction, Txid};
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
pub use swap::{run, run_until, AliceContext};

/// Everything the maker holds once both parties committed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AliceSetup {
    pub params: SwapParameters,
    pub a: SecretKey,
    pub s_a: AdaptorKeyPair,
    pub v_a: PrivateViewKey,
    pub b: PublicKey,
    pub s_b_bitcoin: PublicKey,
    pub s_b_monero: CompressedEdwardsY,
    pub v_b: PrivateViewKey,
    pub redeem_address: ScriptBuf,
    pub punish_address: ScriptBuf,
    pub refund_address: ScriptBuf,
    pub tx_lock: TxLock,
    /// Own refund signature as handed to the taker, needed to recover `s_b`.
    pub tx_refund_encsig: EncryptedSignature,
    pub tx_cancel_sig_bob: Signature,
    pub tx_punish_sig_bob: Signature,
}

impl AliceSetup {
    #[must_use]
    pub fn a_public(&self) -> PublicKey {
        self.a.public_key(SECP256K1)
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
            &self.s_a.monero_point_compressed(),
            &self.s_b_monero,
            &self.view_key(),
        )
    }

    /// Wallet account for sweeping the joint output back once `s_b` is known.
    ///
    /// # Errors
    /// Returns `SwapError::Monero` if the keys do not convert.
    pub fn refund_account(
        &self,
        swap_id: SwapId,
        s_b: &XmrKeyShare,
        restore_height: u64,
    ) -> Result<JointAccount, SwapError> {
        Ok(JointAccount::new(
            format!("swap-{swap_id}"),
            self.params.monero_network,
            self.s_a.xmr_share(),
            s_b,
            &self.view_key(),
            restore_height,
        )?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AliceState {
    Negotiating {
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        btc: Amount,
    },
    Committed {
        setup: Box<AliceSetup>,
    },
    BtcLocked {
        setup: Box<AliceSetup>,
    },
    /// Recorded before the Monero transfer is made.
    XmrLockInFlight {
        setup: Box<AliceSetup>,
        monero_height: u64,
    },
    XmrLocked {
        setup: Box<AliceSetup>,
        transfer_proof: TransferProof,
        monero_height: u64,
    },
    EncSigLearned {
        setup: Box<AliceSetup>,
        transfer_proof: TransferProof,
        monero_height: u64,
        encsig: EncryptedSignature,
    },
    RedeemBroadcast {
        setup: Box<AliceSetup>,
        transfer_proof: TransferProof,
        monero_height: u64,
        tx_redeem: Transaction,
    },
    BtcRedeemed {
        redeem_txid: Txid,
    },
    CancelTimelockExpired {
        setup: Box<AliceSetup>,
        transfer_proof: TransferProof,
        monero_height: u64,
    },
    BtcCancelled {
        setup: Box<AliceSetup>,
        transfer_proof: TransferProof,
        monero_height: u64,
    },
    BtcRefunded {
        setup: Box<AliceSetup>,
        monero_height: u64,
        s_b: XmrKeyShare,
        refund_txid: Txid,
    },
    XmrRefunded {
        sweep_txs: Vec<TxHash>,
    },
    BtcPunishable {
        setup: Box<AliceSetup>,
        transfer_proof: TransferProof,
        monero_height: u64,
    },
    BtcPunished {
        punish_txid: Txid,
    },
    Aborted {
        reason: String,
    },
}

impl AliceState {
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Negotiating { .. } => Phase::Negotiating,
            Self::Committed { .. } => Phase::Committed,
            Self::BtcLocked { .. } | Self::XmrLockInFlight { .. } => Phase::BtcLocked,
            Self::XmrLocked { .. } | Self::EncSigLearned { .. } => Phase::XmrLocked,
            Self::RedeemBroadcast { .. } => Phase::RedeemBroadcast,
            Self::BtcRedeemed { .. } => Phase::BtcRedeemed,
            Self::CancelTimelockExpired { .. }
            | Self::BtcCancelled { .. }
            | Self::BtcRefunded { .. } => Phase::Cancelling,
            Self::XmrRefunded { .. } => Phase::Refunded,
            Self::BtcPunishable { .. } => Phase::Punishing,
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
            Self::XmrLockInFlight { .. } => "xmr_lock_in_flight",
            Self::XmrLocked { .. } => "xmr_locked",
            Self::EncSigLearned { .. } => "enc_sig_learned",
            Self::RedeemBroadcast { .. } => "redeem_broadcast",
            Self::BtcRedeemed { .. } => "btc_redeemed",
            Self::CancelTimelockExpired { .. } => "cancel_timelock_expired",
            Self::BtcCancelled { .. } => "btc_cancelled",
            Self::BtcRefunded { .. } => "btc_refunded",
            Self::XmrRefunded { .. } => "xmr_refunded",
            Self::BtcPunishable { .. } => "btc_punishable",
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
    /// Until Monero is sent nothing of the maker's is at stake and the swap
    /// is simply abandoned. Later failures leave the state in place for an
    /// operator to resume.
    #[must_use]
    pub fn on_fatal(&self, error: &SwapError) -> Option<Self> {
        let abort = || Self::Aborted {
            reason: error.to_string(),
        };
        match self {
            Self::Negotiating { .. } | Self::Committed { .. } | Self::BtcLocked { .. } => {
                Some(abort())
            }
            Self::XmrLockInFlight { .. }
                if matches!(
                    error,
                    SwapError::Monero(caravel_monero::MoneroError::InsufficientFunds { .. })
                ) =>
            {
                Some(abort())
            }
            _ => None,
        }
    }
}

pub fn is_xmr_locked(state: &AliceState) -> bool {
    matches!(state, AliceState::XmrLocked { .. })
}

pub fn is_redeem_broadcast(state: &AliceState) -> bool {
    matches!(state, AliceState::RedeemBroadcast { .. })
}

pub fn is_btc_locked(state: &AliceState) -> bool {
    matches!(state, AliceState::BtcLocked { .. })
}
