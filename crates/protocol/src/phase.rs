//! Phase vocabulary shared by both roles.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Negotiating,
    Committed,
    BtcLocked,
    XmrLocked,
    RedeemBroadcast,
    /// Taker swept the Monero: taker success.
    XmrSwept,
    /// Maker's redeem is buried: maker success.
    BtcRedeemed,
    Cancelling,
    Refunded,
    Punishing,
    Punished,
    Aborted,
}

impl Phase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::XmrSwept | Self::BtcRedeemed | Self::Refunded | Self::Punished | Self::Aborted
        )
    }

    /// Funds may be locked on-chain in this phase.
    #[must_use]
    pub fn has_funds_at_stake(self) -> bool {
        !matches!(self, Self::Negotiating | Self::Committed) && !self.is_terminal()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Negotiating => "negotiating",
            Self::Committed => "committed",
            Self::BtcLocked => "btc locked",
            Self::XmrLocked => "xmr locked",
            Self::RedeemBroadcast => "redeem broadcast",
            Self::XmrSwept => "xmr swept",
            Self::BtcRedeemed => "btc redeemed",
            Self::Cancelling => "cancelling",
            Self::Refunded => "refunded",
            Self::Punishing => "punishing",
            Self::Punished => "punished",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Maker, sells XMR for BTC.
    Alice,
    /// Taker, sells BTC for XMR.
    Bob,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alice => f.write_str("alice"),
            Self::Bob => f.write_str("bob"),
        }
    }
}
