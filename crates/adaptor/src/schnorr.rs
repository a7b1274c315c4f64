//! Schnorr adaptor signature implementation.
//!
//! Implements `encrypt_signature`, `verify_encrypted_signature`,
//! `decrypt_signature` and `recover_secret` over secp256k1 following the
//! BIP340 challenge computation, plus plain BIP340 `sign`/`verify` helpers for
//! the cooperative pre-signatures.

use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, Parity, PublicKey, Scalar, Secp256k1, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CryptoError, Result};

/// Encrypted (adaptor) pre-signature locked to an adaptor point T.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSignature {
    /// R' = R + T (full `PublicKey` for point arithmetic).
    pub r_point: PublicKey,
    /// s' = k + e*x (mod n), big-endian.
    pub s_prime: [u8; 32],
    /// The point T this signature is encrypted under.
    pub adaptor_point: PublicKey,
}

/// BIP340 tagged hash: `SHA256(tag_hash || tag_hash || data)`.
pub(crate) fn tagged_hash(tag: &str, data: &[u8]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(data);
    hasher.finalize().into()
}

/// BIP340 challenge: e = H(R.x || P.x || msg).
fn compute_challenge(r_x: &[u8; 32], pk_x: &[u8; 32], msg: &[u8; 32]) -> Result<Scalar> {
    let mut data = [0u8; 96];
    data[..32].copy_from_slice(r_x);
    data[32..64].copy_from_slice(pk_x);
    data[64..96].copy_from_slice(msg);

    let hash = tagged_hash("BIP0340/challenge", &data);
    Scalar::from_be_bytes(hash).map_err(|_| CryptoError::ScalarOverflow)
}

/// Scalar subtraction: a - b (mod n).
fn scalar_sub_mod_n(a: &[u8; 32], b: &[u8; 32]) -> Result<[u8; 32]> {
    let sk_b = SecretKey::from_slice(b)?;
    let neg_b = sk_b.negate();
    let neg_b_scalar = Scalar::from(neg_b);
    let sk_a = SecretKey::from_slice(a)?;
    let result = sk_a.add_tweak(&neg_b_scalar)?;
    Ok(result.secret_bytes())
}

/// Create an encrypted signature (pre-signature) locked to an adaptor point.
///
/// The pre-signature can only be turned into a valid BIP340 signature by
/// someone who knows the discrete log of the adaptor point.
///
/// # Arguments
/// * `secp` - Secp256k1 context
/// * `signing_key` - Signer's secret key
/// * `msg` - 32-byte message hash to sign
/// * `adaptor_point` - The adaptor point T (public key whose secret unlocks the sig)
///
/// # Errors
/// Returns `CryptoError::InvalidPoint` if `R + T` is the point at infinity and
/// `CryptoError::Secp256k1` if scalar operations fail.
pub fn encrypt_signature<C: secp256k1::Signing>(
    secp: &Secp256k1<C>,
    signing_key: &SecretKey,
    msg: &[u8; 32],
    adaptor_point: &PublicKey,
) -> Result<EncryptedSignature> {
    let mut rng = rand::thread_rng();

    // k = random nonce
    let k = SecretKey::new(&mut rng);

    // R = k * G
    let r = PublicKey::from_secret_key(secp, &k);

    // R' = R + T
    let r_prime = r
        .combine(adaptor_point)
        .map_err(|e| CryptoError::InvalidPoint(e.to_string()))?;

    let (x_only_r_prime, r_parity) = r_prime.x_only_public_key();

    // If R' has odd y, negate k
    let nonce = if r_parity == Parity::Odd { k.negate() } else { k };

    let pk = PublicKey::from_secret_key(secp, signing_key);
    let (x_only_pk, pk_parity) = pk.x_only_public_key();

    // BIP340 keys are x-only: if P has odd y, sign with -x
    let key = if pk_parity == Parity::Odd {
        signing_key.negate()
    } else {
        *signing_key
    };

    let e = compute_challenge(&x_only_r_prime.serialize(), &x_only_pk.serialize(), msg)?;

    // s' = k + e*x
    let e_times_x = key.mul_tweak(&e)?;
    let s_prime = nonce.add_tweak(&Scalar::from(e_times_x))?;

    Ok(EncryptedSignature {
        r_point: r_prime,
        s_prime: s_prime.secret_bytes(),
        adaptor_point: *adaptor_point,
    })
}

/// Verify an encrypted signature.
///
/// Checks that the pre-signature is valid for the given signer key, message
/// and adaptor point. Does NOT verify a BIP340 signature; that happens after
/// decryption.
#[must_use]
pub fn verify_encrypted_signature<C: secp256k1::Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    encsig: &EncryptedSignature,
    msg: &[u8; 32],
    signer: &PublicKey,
    adaptor_point: &PublicKey,
) -> bool {
    if encsig.adaptor_point != *adaptor_point {
        return false;
    }
    verify_inner(secp, encsig, msg, signer).unwrap_or(false)
}

fn verify_inner<C: secp256k1::Verification + secp256k1::Signing>(
    secp: &Secp256k1<C>,
    encsig: &EncryptedSignature,
    msg: &[u8; 32],
    signer: &PublicKey,
) -> Result<bool> {
    let (x_only_r_prime, r_parity) = encsig.r_point.x_only_public_key();
    let (x_only_pk, pk_parity) = signer.x_only_public_key();

    let e = compute_challenge(&x_only_r_prime.serialize(), &x_only_pk.serialize(), msg)?;

    // R = R' - T
    let neg_t = encsig.adaptor_point.negate(secp);
    let r = encsig.r_point.combine(&neg_t)?;

    // If R' has odd y the signer used -k, so compare against -R
    let adjusted_r = if r_parity == Parity::Odd {
        r.negate(secp)
    } else {
        r
    };

    let adjusted_pk = if pk_parity == Parity::Odd {
        signer.negate(secp)
    } else {
        *signer
    };

    let e_p = adjusted_pk.mul_tweak(secp, &e)?;
    let expected = adjusted_r.combine(&e_p)?;

    let s_prime_sk = SecretKey::from_slice(&encsig.s_prime)?;
    let actual = PublicKey::from_secret_key(secp, &s_prime_sk);

    Ok(expected == actual)
}

/// Decrypt an encrypted signature with the adaptor secret.
///
/// # Errors
/// Returns `CryptoError::SecretMismatch` if `secret * G` is not the adaptor
/// point the signature was encrypted under.
pub fn decrypt_signature(encsig: &EncryptedSignature, secret: &SecretKey) -> Result<Signature> {
    if PublicKey::from_secret_key(SECP256K1, secret) != encsig.adaptor_point {
        return Err(CryptoError::SecretMismatch);
    }

    let s_prime_sk = SecretKey::from_slice(&encsig.s_prime)?;
    let (x_only_r, parity) = encsig.r_point.x_only_public_key();

    // If R' has odd y, negate t to keep s*G = R' + e*P
    let adjusted_t = if parity == Parity::Odd {
        secret.negate()
    } else {
        *secret
    };

    // s = s' + t
    let s = s_prime_sk.add_tweak(&Scalar::from(adjusted_t))?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(&x_only_r.serialize());
    sig_bytes[32..].copy_from_slice(&s.secret_bytes());

    Ok(Signature::from_slice(&sig_bytes)?)
}

/// Recover the adaptor secret from a published signature.
///
/// This is how one party learns the other's secret after the decrypted
/// signature shows up in a transaction witness.
///
/// # Errors
/// Returns `CryptoError::RecoveryMismatch` if the signature was not produced
/// from `encsig`, i.e. the recovered scalar does not map to the adaptor point.
pub fn recover_secret(signature: &Signature, encsig: &EncryptedSignature) -> Result<SecretKey> {
    let sig_bytes: [u8; 64] = signature.serialize();
    let (x_only_r, r_parity) = encsig.r_point.x_only_public_key();
    if sig_bytes[..32] != x_only_r.serialize() {
        return Err(CryptoError::RecoveryMismatch);
    }

    let mut s_array = [0u8; 32];
    s_array.copy_from_slice(&sig_bytes[32..64]);

    // t = s - s'
    let t_bytes =
        scalar_sub_mod_n(&s_array, &encsig.s_prime).map_err(|_| CryptoError::RecoveryMismatch)?;
    let t = SecretKey::from_slice(&t_bytes).map_err(|_| CryptoError::RecoveryMismatch)?;

    let adjusted_t = if r_parity == Parity::Odd { t.negate() } else { t };

    if PublicKey::from_secret_key(SECP256K1, &adjusted_t) != encsig.adaptor_point {
        return Err(CryptoError::RecoveryMismatch);
    }
    Ok(adjusted_t)
}

/// Plain BIP340 signature over a 32-byte digest.
#[must_use]
pub fn sign<C: secp256k1::Signing>(
    secp: &Secp256k1<C>,
    key: &SecretKey,
    msg: &[u8; 32],
) -> Signature {
    let keypair = Keypair::from_secret_key(secp, key);
    secp.sign_schnorr(&Message::from_digest(*msg), &keypair)
}

/// Verify a BIP340 signature against the x-only form of `signer`.
///
/// # Errors
/// Returns `CryptoError::VerificationFailed` if the signature does not verify.
pub fn verify<C: secp256k1::Verification>(
    secp: &Secp256k1<C>,
    signer: &PublicKey,
    msg: &[u8; 32],
    sig: &Signature,
) -> Result<()> {
    let (x_only, _) = signer.x_only_public_key();
    secp.verify_schnorr(sig, &Message::from_digest(*msg), &x_only)
        .map_err(|_| CryptoError::VerificationFailed)
}
