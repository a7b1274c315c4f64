//! Swap identity, negotiated terms and local configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bitcoin::secp256k1::PublicKey;
use bitcoin::Amount;
use caravel_bitcoin::{CancelTimelock, FeePolicy, PunishTimelock};
use caravel_monero::XmrAmount;
use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::retry::RetryConfig;

/// Unique identifier of one swap, fixed when negotiation starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(Uuid);

impl SwapId {
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SwapId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

const SATS_PER_BTC: u128 = 100_000_000;

/// Exchange rate as piconero paid per whole bitcoin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pico_per_btc: u64,
}

impl Rate {
    #[must_use]
    pub const fn new(xmr_per_btc: XmrAmount) -> Self {
        Self {
            pico_per_btc: xmr_per_btc.as_pico(),
        }
    }

    #[must_use]
    pub fn xmr_per_btc(self) -> XmrAmount {
        XmrAmount::from_pico(self.pico_per_btc)
    }

    /// XMR bought with `btc` at this rate, rounded down.
    #[must_use]
    pub fn xmr_for(self, btc: Amount) -> Option<XmrAmount> {
        let pico = u128::from(btc.to_sat()) * u128::from(self.pico_per_btc) / SATS_PER_BTC;
        u64::try_from(pico).ok().map(XmrAmount::from_pico)
    }

    /// The rate lowered by `bps` basis points.
    #[must_use]
    pub fn with_spread(self, bps: u32) -> Self {
        let kept = 10_000u128.saturating_sub(u128::from(bps));
        let pico = u128::from(self.pico_per_btc) * kept / 10_000;
        Self {
            pico_per_btc: u64::try_from(pico).unwrap_or(u64::MAX),
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/BTC", self.xmr_per_btc())
    }
}

/// Terms both parties agree on before anything is locked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapParameters {
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub btc: Amount,
    pub xmr: XmrAmount,
    pub rate: Rate,
    pub cancel_timelock: CancelTimelock,
    pub punish_timelock: PunishTimelock,
    pub fee: FeePolicy,
    pub bitcoin_network: bitcoin::Network,
    pub monero_network: monero::Network,
}

/// Public key material one party contributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicShares {
    /// Key in the joint Bitcoin output.
    pub key: PublicKey,
    /// Adaptor point on secp256k1.
    pub s_bitcoin: PublicKey,
    /// The same secret on ed25519.
    pub s_monero: CompressedEdwardsY,
}

/// Hash binding the terms to both parties' key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commitment([u8; 32]);

impl SwapParameters {
    /// Commits to the terms and both key sets.
    ///
    /// # Errors
    /// Returns `serde_json::Error` if serialization fails.
    pub fn commitment(
        &self,
        alice: &PublicShares,
        bob: &PublicShares,
    ) -> Result<Commitment, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(b"caravel/swap-commitment");
        hasher.update(serde_json::to_vec(self)?);
        hasher.update(serde_json::to_vec(alice)?);
        hasher.update(serde_json::to_vec(bob)?);
        Ok(Commitment(hasher.finalize().into()))
    }
}

/// Local settings of one party, not negotiated.
#[derive(Clone, Debug)]
pub struct SwapConfig {
    pub bitcoin_network: bitcoin::Network,
    pub monero_network: monero::Network,
    pub cancel_timelock: CancelTimelock,
    pub punish_timelock: PunishTimelock,
    pub fee: FeePolicy,
    /// Depth at which a Bitcoin transaction is treated as final.
    pub bitcoin_finality: u32,
    /// Confirmations at which the Monero lock is treated as final.
    pub monero_finality: u64,
    pub poll_interval: Duration,
    /// Deadline for each negotiation message.
    pub negotiation_timeout: Duration,
    /// How long the maker waits for the lock transaction to appear.
    pub lock_seen_timeout: Duration,
    pub retry: RetryConfig,
}

impl SwapConfig {
    /// Regtest/stagenet settings with fast polling.
    #[must_use]
    pub fn regtest() -> Self {
        Self {
            bitcoin_network: bitcoin::Network::Regtest,
            monero_network: monero::Network::Stagenet,
            cancel_timelock: CancelTimelock::new(12),
            punish_timelock: PunishTimelock::new(6),
            fee: FeePolicy::default(),
            bitcoin_finality: 1,
            monero_finality: 1,
            poll_interval: Duration::from_millis(100),
            negotiation_timeout: Duration::from_secs(30),
            lock_seen_timeout: Duration::from_secs(600),
            retry: RetryConfig::default(),
        }
    }

    /// Whether `params` carry this party's own chain and timelock settings.
    #[must_use]
    pub fn accepts(&self, params: &SwapParameters) -> bool {
        params.bitcoin_network == self.bitcoin_network
            && params.monero_network == self.monero_network
            && params.cancel_timelock == self.cancel_timelock
            && params.punish_timelock == self.punish_timelock
            && params.fee == self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{SecretKey, SECP256K1};

    fn rate() -> Rate {
        Rate::new(XmrAmount::from_pico(150_000_000_000_000))
    }

    fn params() -> SwapParameters {
        let config = SwapConfig::regtest();
        SwapParameters {
            btc: Amount::from_sat(1_000_000),
            xmr: XmrAmount::from_pico(1_500_000_000_000),
            rate: rate(),
            cancel_timelock: config.cancel_timelock,
            punish_timelock: config.punish_timelock,
            fee: config.fee,
            bitcoin_network: config.bitcoin_network,
            monero_network: config.monero_network,
        }
    }

    fn shares() -> PublicShares {
        let key = SecretKey::new(&mut rand::thread_rng()).public_key(SECP256K1);
        PublicShares {
            key,
            s_bitcoin: key,
            s_monero: CompressedEdwardsY([1u8; 32]),
        }
    }

    #[test]
    fn converts_btc_to_xmr() {
        assert_eq!(
            rate().xmr_for(Amount::from_sat(1_000_000)),
            Some(XmrAmount::from_pico(1_500_000_000_000))
        );
    }

    #[test]
    fn spread_lowers_rate() {
        let spread = rate().with_spread(100);
        assert_eq!(
            spread.xmr_per_btc(),
            XmrAmount::from_pico(148_500_000_000_000)
        );
        assert_eq!(rate().with_spread(0), rate());
    }

    #[test]
    fn swap_id_roundtrips_through_string() {
        let id = SwapId::random();
        assert_eq!(id.to_string().parse::<SwapId>().unwrap(), id);
    }

    #[test]
    fn commitment_binds_terms_and_keys() {
        let (alice, bob) = (shares(), shares());
        let base = params().commitment(&alice, &bob).unwrap();
        assert_eq!(base, params().commitment(&alice, &bob).unwrap());

        let mut changed = params();
        changed.xmr = XmrAmount::from_pico(1);
        assert_ne!(base, changed.commitment(&alice, &bob).unwrap());
        assert_ne!(base, params().commitment(&bob, &alice).unwrap());
    }

    #[test]
    fn config_accepts_own_terms_only() {
        let config = SwapConfig::regtest();
        assert!(config.accepts(&params()));

        let mut other = params();
        other.cancel_timelock = CancelTimelock::new(1);
        assert!(!config.accepts(&other));
    }
}
