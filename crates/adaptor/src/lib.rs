//! Crypto core for BTC/XMR atomic swaps.
//!
//! Provides BIP340 Schnorr adaptor signatures (`encrypt_signature`,
//! `verify_encrypted_signature`, `decrypt_signature`, `recover_secret`), the
//! bit-exact mapping between secp256k1 and ed25519 scalars, and a cross-curve
//! DLEQ proof showing that a Bitcoin point and a Monero point share one
//! discrete log.

pub mod dleq;
pub mod keys;
pub mod schnorr;

pub use dleq::CrossCurveProof;
pub use keys::{
    derive_monero_spend_component, generate_adaptor_keypair, monero_point_from_bytes,
    AdaptorKeyPair, XmrKeyShare,
};
pub use schnorr::{
    decrypt_signature, encrypt_signature, recover_secret, sign, verify,
    verify_encrypted_signature, EncryptedSignature,
};

use thiserror::Error;

/// Errors that can occur in the crypto core.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encrypted signature verification failed.
    #[error("encrypted signature verification failed")]
    VerificationFailed,

    /// A point failed to decode or is not usable (identity, small order).
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    /// Scalar bytes are not the canonical encoding on the target curve.
    #[error("non-canonical scalar encoding")]
    NonCanonicalScalar,

    /// The decryption secret does not match the adaptor point.
    #[error("secret does not match adaptor point")]
    SecretMismatch,

    /// The secret recovered from a published signature does not match the adaptor point.
    #[error("recovered secret does not match adaptor point")]
    RecoveryMismatch,

    /// A cross-curve DLEQ proof was malformed or did not verify.
    #[error("invalid cross-curve proof: {0}")]
    InvalidProof(String),

    /// Scalar arithmetic overflow.
    #[error("scalar arithmetic overflow")]
    ScalarOverflow,

    /// Underlying secp256k1 error.
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// Result type for crypto core operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
