//! TxRedeem: the maker takes the locked bitcoin.
//!
//! The maker signs with her own key and completes the taker's signature,
//! which the taker handed over encrypted under the maker's adaptor point.
//! Publishing it therefore reveals the maker's Monero key share.

use std::ops::Deref;

use bitcoin::{ScriptBuf, Sequence};

use crate::fee::FeePolicy;
use crate::lock::TxLock;
use crate::spend::JointSpend;
use crate::Result;

#[derive(Clone, Debug)]
pub struct TxRedeem {
    inner: JointSpend,
}

impl TxRedeem {
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the lock amount cannot pay
    /// the redeem fee.
    pub fn new(lock: &TxLock, redeem_destination: ScriptBuf, fee: &FeePolicy) -> Result<Self> {
        let inner = JointSpend::new(
            lock.outpoint(),
            lock.output(),
            lock.joint_output()?,
            lock.keys(),
            Sequence::MAX,
            redeem_destination,
            fee,
        )?;
        Ok(Self { inner })
    }
}

impl Deref for TxRedeem {
    type Target = JointSpend;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
