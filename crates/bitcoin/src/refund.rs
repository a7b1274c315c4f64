//! TxRefund: the taker takes the cancelled bitcoin back.
//!
//! Mirror image of redeem: the maker's signature is encrypted under the
//! taker's adaptor point, so publishing the refund hands the maker the
//! taker's Monero key share.

use std::ops::Deref;

use bitcoin::{ScriptBuf, Sequence};

use crate::cancel::TxCancel;
use crate::fee::FeePolicy;
use crate::spend::JointSpend;
use crate::Result;

#[derive(Clone, Debug)]
pub struct TxRefund {
    inner: JointSpend,
}

impl TxRefund {
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the cancel output cannot
    /// pay the refund fee.
    pub fn new(
        cancel: &TxCancel,
        refund_destination: ScriptBuf,
        fee: &FeePolicy,
    ) -> Result<Self> {
        let inner = JointSpend::new(
            cancel.outpoint(),
            cancel.output().clone(),
            cancel.spent_joint().clone(),
            cancel.keys(),
            Sequence::MAX,
            refund_destination,
            fee,
        )?;
        Ok(Self { inner })
    }
}

impl Deref for TxRefund {
    type Target = JointSpend;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
