//! Key material shared between secp256k1 and ed25519.
//!
//! A swap secret `s` is sampled as an ed25519 scalar. Because the ed25519
//! group order is smaller than the secp256k1 order, the same integer is a
//! valid secret key on both curves. The mapping between the two encodings is
//! fixed: big-endian secp256k1 bytes, reversed, are the little-endian ed25519
//! bytes.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar as EdScalar;
use rand::{CryptoRng, RngCore};
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::dleq::{self, CrossCurveProof};
use crate::{CryptoError, Result};

/// Monero half of a swap secret: an ed25519 scalar.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct XmrKeyShare(EdScalar);

impl std::fmt::Debug for XmrKeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("XmrKeyShare(..)")
    }
}

impl XmrKeyShare {
    /// Wrap an ed25519 scalar.
    #[must_use]
    pub fn new(scalar: EdScalar) -> Self {
        Self(scalar)
    }

    /// Parse canonical little-endian scalar bytes.
    ///
    /// # Errors
    /// Returns `CryptoError::NonCanonicalScalar` if the bytes are not reduced
    /// modulo the ed25519 group order.
    pub fn from_canonical_bytes(bytes: [u8; 32]) -> Result<Self> {
        Option::<EdScalar>::from(EdScalar::from_canonical_bytes(bytes))
            .map(Self)
            .ok_or(CryptoError::NonCanonicalScalar)
    }

    #[must_use]
    pub fn scalar(&self) -> EdScalar {
        self.0
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// `s * G'` on ed25519.
    #[must_use]
    pub fn public_point(&self) -> EdwardsPoint {
        ED25519_BASEPOINT_POINT * self.0
    }

    /// The same integer as a secp256k1 secret key.
    ///
    /// # Errors
    /// Returns `CryptoError::Secp256k1` for the zero scalar.
    pub fn to_bitcoin_secret(&self) -> Result<SecretKey> {
        let mut be = self.0.to_bytes();
        be.reverse();
        Ok(SecretKey::from_slice(&be)?)
    }
}

/// Map a secp256k1 secret onto its ed25519 counterpart, bit for bit.
///
/// # Errors
/// Returns `CryptoError::NonCanonicalScalar` if the integer is not below the
/// ed25519 group order. Secrets produced by [`generate_adaptor_keypair`]
/// always map.
pub fn derive_monero_spend_component(secret: &SecretKey) -> Result<XmrKeyShare> {
    let mut le = secret.secret_bytes();
    le.reverse();
    XmrKeyShare::from_canonical_bytes(le)
}

/// Decode a Monero public key, rejecting invalid encodings and small-order points.
///
/// # Errors
/// Returns `CryptoError::InvalidPoint` if the bytes do not decompress or the
/// point has small order.
pub fn monero_point_from_bytes(bytes: [u8; 32]) -> Result<EdwardsPoint> {
    let point = CompressedEdwardsY(bytes)
        .decompress()
        .ok_or_else(|| CryptoError::InvalidPoint("not an ed25519 point".into()))?;
    if point.is_small_order() {
        return Err(CryptoError::InvalidPoint("small-order ed25519 point".into()));
    }
    Ok(point)
}

/// A swap secret valid on both curves together with its public points.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdaptorKeyPair {
    secret: SecretKey,
    share: XmrKeyShare,
    bitcoin_point: PublicKey,
    monero_point: EdwardsPoint,
}

impl AdaptorKeyPair {
    /// Build a key pair from an ed25519 share.
    ///
    /// # Errors
    /// Returns `CryptoError::Secp256k1` for the zero scalar.
    pub fn from_share(share: XmrKeyShare) -> Result<Self> {
        let secret = share.to_bitcoin_secret()?;
        Ok(Self {
            bitcoin_point: PublicKey::from_secret_key(SECP256K1, &secret),
            monero_point: share.public_point(),
            secret,
            share,
        })
    }

    #[must_use]
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    #[must_use]
    pub fn xmr_share(&self) -> &XmrKeyShare {
        &self.share
    }

    /// `S = s * G` on secp256k1.
    #[must_use]
    pub fn bitcoin_point(&self) -> PublicKey {
        self.bitcoin_point
    }

    /// `S' = s * G'` on ed25519.
    #[must_use]
    pub fn monero_point(&self) -> EdwardsPoint {
        self.monero_point
    }

    #[must_use]
    pub fn monero_point_compressed(&self) -> CompressedEdwardsY {
        self.monero_point.compress()
    }

    /// Prove that both public points share this secret.
    ///
    /// # Errors
    /// Propagates `CryptoError` from the proof construction.
    pub fn prove<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<CrossCurveProof> {
        dleq::prove(&self.share, rng)
    }
}

/// Sample a secret that is valid on both curves.
pub fn generate_adaptor_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> AdaptorKeyPair {
    loop {
        let scalar = EdScalar::random(rng);
        if let Ok(keypair) = AdaptorKeyPair::from_share(XmrKeyShare(scalar)) {
            return keypair;
        }
    }
}
