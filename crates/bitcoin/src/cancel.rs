//! TxCancel: moves the lock output into a second joint output once the
//! cancel timelock has expired.

use std::ops::Deref;

use bitcoin::OutPoint;

use crate::fee::FeePolicy;
use crate::lock::TxLock;
use crate::spend::JointSpend;
use crate::timelocks::CancelTimelock;
use crate::Result;

#[derive(Clone, Debug)]
pub struct TxCancel {
    inner: JointSpend,
    timelock: CancelTimelock,
}

impl TxCancel {
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the lock amount cannot pay
    /// the cancel fee.
    pub fn new(lock: &TxLock, timelock: CancelTimelock, fee: &FeePolicy) -> Result<Self> {
        let joint = lock.joint_output()?;
        let destination = joint.script_pubkey();
        let inner = JointSpend::new(
            lock.outpoint(),
            lock.output(),
            joint,
            lock.keys(),
            timelock.to_sequence(),
            destination,
            fee,
        )?;
        Ok(Self { inner, timelock })
    }

    #[must_use]
    pub fn timelock(&self) -> CancelTimelock {
        self.timelock
    }

    /// The joint output refund and punish spend.
    #[must_use]
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid(), 0)
    }
}

impl Deref for TxCancel {
    type Target = JointSpend;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
