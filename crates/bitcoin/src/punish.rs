//! TxPunish: the maker takes the cancelled bitcoin after the punish timelock.

use std::ops::Deref;

use bitcoin::ScriptBuf;

use crate::cancel::TxCancel;
use crate::fee::FeePolicy;
use crate::spend::JointSpend;
use crate::timelocks::PunishTimelock;
use crate::Result;

#[derive(Clone, Debug)]
pub struct TxPunish {
    inner: JointSpend,
}

impl TxPunish {
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the cancel output cannot
    /// pay the punish fee.
    pub fn new(
        cancel: &TxCancel,
        punish_destination: ScriptBuf,
        timelock: PunishTimelock,
        fee: &FeePolicy,
    ) -> Result<Self> {
        let inner = JointSpend::new(
            cancel.outpoint(),
            cancel.output().clone(),
            cancel.spent_joint().clone(),
            cancel.keys(),
            timelock.to_sequence(),
            punish_destination,
            fee,
        )?;
        Ok(Self { inner })
    }
}

impl Deref for TxPunish {
    type Target = JointSpend;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
