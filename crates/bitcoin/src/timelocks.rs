//! Relative timelocks on the cancel and punish paths.
//!
//! Both timelocks are BIP68 block-height locks carried in the `nSequence` of
//! the pre-signed TxCancel and TxPunish inputs. Expiry is evaluated from the
//! confirmation depth of the transaction they are relative to.

use std::fmt;

use bitcoin::Sequence;
use serde::{Deserialize, Serialize};

use crate::wallet::TxStatus;

/// Blocks TxLock must be buried before TxCancel is valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CancelTimelock(u16);

/// Blocks TxCancel must be buried before TxPunish is valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PunishTimelock(u16);

macro_rules! timelock_impls {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub const fn new(blocks: u16) -> Self {
                Self(blocks)
            }

            #[must_use]
            pub const fn blocks(self) -> u32 {
                self.0 as u32
            }

            /// The input sequence that enforces this lock.
            #[must_use]
            pub fn to_sequence(self) -> Sequence {
                Sequence::from_height(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} blocks", self.0)
            }
        }
    };
}

timelock_impls!(CancelTimelock);
timelock_impls!(PunishTimelock);

/// Which spend paths of the lock output are currently open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "epoch", rename_all = "snake_case")]
pub enum ExpiredTimelocks {
    /// Only cooperative redeem is possible.
    None { blocks_left: u32 },
    /// TxCancel (and after it TxRefund) may be published.
    Cancel { blocks_left: u32 },
    /// TxPunish may be published.
    Punish,
}

impl ExpiredTimelocks {
    #[must_use]
    pub fn cancel_expired(&self) -> bool {
        !matches!(self, Self::None { .. })
    }
}

/// Evaluates the timelock epoch from TxLock and TxCancel confirmation status.
#[must_use]
pub fn expired_timelocks(
    cancel: CancelTimelock,
    punish: PunishTimelock,
    tx_lock: TxStatus,
    tx_cancel: TxStatus,
) -> ExpiredTimelocks {
    if tx_cancel.is_confirmed_with(punish.blocks()) {
        return ExpiredTimelocks::Punish;
    }
    if tx_lock.is_confirmed_with(cancel.blocks()) {
        return ExpiredTimelocks::Cancel {
            blocks_left: tx_cancel.blocks_left_until(punish.blocks()),
        };
    }
    ExpiredTimelocks::None {
        blocks_left: tx_lock.blocks_left_until(cancel.blocks()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANCEL: CancelTimelock = CancelTimelock::new(12);
    const PUNISH: PunishTimelock = PunishTimelock::new(6);

    #[test]
    fn unconfirmed_lock_has_full_cancel_window() {
        let epoch = expired_timelocks(CANCEL, PUNISH, TxStatus::InMempool, TxStatus::Unseen);
        assert_eq!(epoch, ExpiredTimelocks::None { blocks_left: 12 });
        assert!(!epoch.cancel_expired());
    }

    #[test]
    fn cancel_opens_at_exact_depth() {
        let before = expired_timelocks(
            CANCEL,
            PUNISH,
            TxStatus::Confirmed { depth: 11 },
            TxStatus::Unseen,
        );
        assert_eq!(before, ExpiredTimelocks::None { blocks_left: 1 });

        let at = expired_timelocks(
            CANCEL,
            PUNISH,
            TxStatus::Confirmed { depth: 12 },
            TxStatus::Unseen,
        );
        assert_eq!(at, ExpiredTimelocks::Cancel { blocks_left: 6 });
        assert!(at.cancel_expired());
    }

    #[test]
    fn punish_requires_buried_cancel() {
        let cancel_young = expired_timelocks(
            CANCEL,
            PUNISH,
            TxStatus::Confirmed { depth: 30 },
            TxStatus::Confirmed { depth: 5 },
        );
        assert_eq!(cancel_young, ExpiredTimelocks::Cancel { blocks_left: 1 });

        let punish = expired_timelocks(
            CANCEL,
            PUNISH,
            TxStatus::Confirmed { depth: 30 },
            TxStatus::Confirmed { depth: 6 },
        );
        assert_eq!(punish, ExpiredTimelocks::Punish);
    }

    #[test]
    fn sequence_is_height_lock() {
        let seq = CANCEL.to_sequence();
        assert!(seq.is_relative_lock_time());
        assert!(seq.is_height_locked());
        assert_eq!(seq.0, 12);
    }

    #[test]
    fn timelocks_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&CANCEL).expect("serialize"), "12");
        let back: PunishTimelock = serde_json::from_str("6").expect("deserialize");
        assert_eq!(back, PUNISH);
    }
}
