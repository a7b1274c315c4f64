//! Joint Monero keys.
//!
//! The swap output lives at an address whose spend key is `s_a + s_b` and
//! whose view key is `v_a + v_b`. Both parties know the view key from the
//! start, so both can watch the output. The spend key only becomes known to
//! whoever learns the other party's share from a Bitcoin witness.

use adaptor::XmrKeyShare;
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{MoneroError, Result};

/// One party's share of the joint private view key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateViewKey(Scalar);

impl std::fmt::Debug for PrivateViewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateViewKey(..)")
    }
}

impl PrivateViewKey {
    #[must_use]
    pub fn new_random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(Scalar::random(rng))
    }

    #[must_use]
    pub fn public(&self) -> EdwardsPoint {
        ED25519_BASEPOINT_POINT * self.0
    }

    /// `self + other`, the joint view key both parties can compute.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self(self.0 + other.0)
    }

    /// # Errors
    /// Returns `MoneroError::Key` if the scalar is rejected by the `monero` crate.
    pub fn to_monero(&self) -> Result<monero::PrivateKey> {
        to_private_key(&self.0)
    }
}

fn to_private_key(scalar: &Scalar) -> Result<monero::PrivateKey> {
    monero::PrivateKey::from_slice(scalar.as_bytes()).map_err(|e| MoneroError::Key(e.to_string()))
}

fn to_public_key(point: &EdwardsPoint) -> Result<monero::PublicKey> {
    monero::PublicKey::from_slice(point.compress().as_bytes())
        .map_err(|e| MoneroError::Key(e.to_string()))
}

/// Joint private spend key `s_a + s_b`.
///
/// # Errors
/// Returns `MoneroError::Key` if the sum is rejected by the `monero` crate.
pub fn build_joint_spend_key(s_a: &XmrKeyShare, s_b: &XmrKeyShare) -> Result<monero::PrivateKey> {
    to_private_key(&(s_a.scalar() + s_b.scalar()))
}

/// Joint public spend key `S'_a + S'_b`, computable before any secret leaks.
///
/// # Errors
/// Returns `MoneroError::Key` if the point is rejected by the `monero` crate.
pub fn joint_public_spend_key(
    s_a: &EdwardsPoint,
    s_b: &EdwardsPoint,
) -> Result<monero::PublicKey> {
    to_public_key(&(s_a + s_b))
}

/// Standard address of the joint output.
///
/// # Errors
/// Returns `MoneroError::Key` if a key fails to convert.
pub fn joint_address(
    network: monero::Network,
    s_a: &EdwardsPoint,
    s_b: &EdwardsPoint,
    view: &PrivateViewKey,
) -> Result<monero::Address> {
    let spend = joint_public_spend_key(s_a, s_b)?;
    let view = to_public_key(&view.public())?;
    Ok(monero::Address::standard(network, spend, view))
}

/// Everything a wallet needs to open and sweep the joint output.
#[derive(Debug, Clone)]
pub struct JointAccount {
    /// Wallet file name, unique per swap.
    pub name: String,
    pub address: monero::Address,
    pub spend_key: monero::PrivateKey,
    pub view_key: monero::PrivateKey,
    /// Height the lock transfer was made at, to skip scanning older blocks.
    pub restore_height: u64,
}

impl JointAccount {
    /// Assembles the account once both spend shares are known.
    ///
    /// # Errors
    /// Returns `MoneroError::Key` if a key fails to convert.
    pub fn new(
        name: String,
        network: monero::Network,
        s_a: &XmrKeyShare,
        s_b: &XmrKeyShare,
        view: &PrivateViewKey,
        restore_height: u64,
    ) -> Result<Self> {
        let spend_key = build_joint_spend_key(s_a, s_b)?;
        let address = joint_address(network, &s_a.public_point(), &s_b.public_point(), view)?;
        Ok(Self {
            name,
            address,
            spend_key,
            view_key: view.to_monero()?,
            restore_height,
        })
    }
}
