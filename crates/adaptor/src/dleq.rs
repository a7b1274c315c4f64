//! Cross-curve discrete log equality proof.
//!
//! Shows that a secp256k1 point `S = s*G` and an ed25519 point `S' = s*G'`
//! have the same discrete log without revealing `s`. The secret is split into
//! 253 bits. For each bit `b_i` both curves get a Pedersen commitment
//! `C_i = b_i*G + r_i*H`, and a two-branch ring signature with a shared
//! challenge proves that the pair commits to the same bit. Blinding factors
//! are chosen so that `sum(2^i * r_i) = 0` on both curves, which makes the
//! weighted commitment sums equal to `S` and `S'`.
//!
//! Challenges are truncated to 248 bits so one integer is a valid scalar on
//! both curves.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar as EdScalar;
use rand::{CryptoRng, RngCore};
use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};

use crate::keys::XmrKeyShare;
use crate::schnorr::tagged_hash;
use crate::{CryptoError, Result};

/// Number of committed bits; the ed25519 group order is below 2^253.
pub const BITS: usize = 253;

/// BIP341 NUMS point, used as the second secp256k1 generator.
const SECP_H: [u8; 33] = [
    0x02, 0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a,
    0x5e, 0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a,
    0xc0,
];

/// Monero's Pedersen commitment generator `H`.
const ED_H: [u8; 32] = [
    0x8b, 0x65, 0x59, 0x70, 0x15, 0x37, 0x99, 0xaf, 0x2a, 0xea, 0xdc, 0x9f, 0xf1, 0xad, 0xd0, 0xea,
    0x6c, 0x72, 0x51, 0xd5, 0x41, 0x54, 0xcf, 0xa9, 0x2c, 0x17, 0x3a, 0x0d, 0xd3, 0x9c, 0x1f, 0x94,
];

const CHALLENGE_TAG: &str = "caravel/dleq/ring";

/// Proof that a secp256k1 and an ed25519 point share a discrete log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossCurveProof {
    bits: Vec<BitProof>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct BitProof {
    commitment: PublicKey,
    commitment_ed: CompressedEdwardsY,
    /// Challenge for branch 0, big-endian, top byte zero.
    challenge: [u8; 32],
    responses: [[u8; 32]; 2],
    responses_ed: [EdScalar; 2],
}

struct Generators {
    g: PublicKey,
    h: PublicKey,
    g_ed: EdwardsPoint,
    h_ed: EdwardsPoint,
}

impl Generators {
    fn new() -> Result<Self> {
        let mut one = [0u8; 32];
        one[31] = 1;
        let h_ed = CompressedEdwardsY(ED_H)
            .decompress()
            .ok_or_else(|| CryptoError::InvalidPoint("ed25519 H".into()))?;
        Ok(Self {
            g: PublicKey::from_secret_key(SECP256K1, &SecretKey::from_slice(&one)?),
            h: PublicKey::from_slice(&SECP_H)?,
            g_ed: ED25519_BASEPOINT_POINT,
            h_ed,
        })
    }
}

/// A ring challenge, the same integer on both curves.
struct Challenge {
    bytes: [u8; 32],
    secp: Scalar,
    ed: EdScalar,
}

impl Challenge {
    fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        if bytes[0] != 0 {
            return Err(CryptoError::InvalidProof("challenge exceeds 248 bits".into()));
        }
        let secp = Scalar::from_be_bytes(bytes).map_err(|_| CryptoError::ScalarOverflow)?;
        let mut le = bytes;
        le.reverse();
        Ok(Self {
            bytes,
            secp,
            ed: EdScalar::from_bytes_mod_order(le),
        })
    }
}

/// Public inputs bound into every challenge.
struct Statement {
    bitcoin_point: PublicKey,
    monero_point: CompressedEdwardsY,
}

impl Statement {
    /// Challenge for the branch following `branch`, given its nonces.
    fn challenge(
        &self,
        index: usize,
        branch: usize,
        commitment: &PublicKey,
        commitment_ed: &CompressedEdwardsY,
        nonce: &PublicKey,
        nonce_ed: &EdwardsPoint,
    ) -> Result<Challenge> {
        let mut data = Vec::with_capacity(33 + 32 + 2 + 1 + 33 + 32 + 33 + 32);
        data.extend_from_slice(&self.bitcoin_point.serialize());
        data.extend_from_slice(self.monero_point.as_bytes());
        data.extend_from_slice(&(index as u16).to_be_bytes());
        data.push(branch as u8);
        data.extend_from_slice(&commitment.serialize());
        data.extend_from_slice(commitment_ed.as_bytes());
        data.extend_from_slice(&nonce.serialize());
        data.extend_from_slice(nonce_ed.compress().as_bytes());

        let mut hash = tagged_hash(CHALLENGE_TAG, &data);
        hash[0] = 0;
        Challenge::from_bytes(hash)
    }
}

fn two() -> Result<Scalar> {
    let mut bytes = [0u8; 32];
    bytes[31] = 2;
    Scalar::from_be_bytes(bytes).map_err(|_| CryptoError::ScalarOverflow)
}

/// `z*H - e*P` on secp256k1.
fn ring_nonce(h: &PublicKey, z: &SecretKey, p: &PublicKey, e: &Scalar) -> Result<PublicKey> {
    let zh = h.mul_tweak(SECP256K1, &Scalar::from(*z))?;
    let ep = p.mul_tweak(SECP256K1, e)?;
    Ok(zh.combine(&ep.negate(SECP256K1))?)
}

/// Blinding factors with `sum(2^i * r_i) = 0` on each curve.
fn blinding_factors<R: RngCore + CryptoRng>(
    rng: &mut R,
) -> Result<(Vec<SecretKey>, Vec<EdScalar>)> {
    let mut blinders = Vec::with_capacity(BITS);
    let mut blinders_ed = Vec::with_capacity(BITS);
    for _ in 0..BITS {
        blinders.push(SecretKey::new(rng));
        blinders_ed.push(EdScalar::random(rng));
    }

    // Horner: acc = sum_{i>=1} 2^(i-1) * r_i
    let two = two()?;
    let mut acc = blinders[BITS - 1];
    for r in blinders[1..BITS - 1].iter().rev() {
        acc = acc.mul_tweak(&two)?.add_tweak(&Scalar::from(*r))?;
    }
    blinders[0] = acc.mul_tweak(&two)?.negate();

    let mut acc_ed = EdScalar::ZERO;
    let mut weight = EdScalar::ONE;
    for r in &blinders_ed[1..] {
        weight += weight;
        acc_ed += weight * r;
    }
    blinders_ed[0] = -acc_ed;

    Ok((blinders, blinders_ed))
}

/// Prove that `share` is the discrete log of both of its public points.
///
/// # Errors
/// Returns `CryptoError` if a scalar or point operation fails, which only
/// happens with negligible probability for honest input.
pub fn prove<R: RngCore + CryptoRng>(
    share: &XmrKeyShare,
    rng: &mut R,
) -> Result<CrossCurveProof> {
    let gens = Generators::new()?;
    let secret = share.to_bitcoin_secret()?;
    let statement = Statement {
        bitcoin_point: PublicKey::from_secret_key(SECP256K1, &secret),
        monero_point: share.public_point().compress(),
    };
    let scalar_bytes = share.to_bytes();
    let (blinders, blinders_ed) = blinding_factors(rng)?;
    let neg_g = gens.g.negate(SECP256K1);

    let mut bits = Vec::with_capacity(BITS);
    for i in 0..BITS {
        let bit = (scalar_bytes[i / 8] >> (i % 8)) & 1 == 1;
        let own = usize::from(bit);
        let other = 1 - own;

        let mut commitment = gens.h.mul_tweak(SECP256K1, &Scalar::from(blinders[i]))?;
        let mut commitment_point_ed = gens.h_ed * blinders_ed[i];
        if bit {
            commitment = commitment.combine(&gens.g)?;
            commitment_point_ed += gens.g_ed;
        }
        let commitment_ed = commitment_point_ed.compress();

        let keys = [commitment, commitment.combine(&neg_g)?];
        let keys_ed = [commitment_point_ed, commitment_point_ed - gens.g_ed];

        let k = SecretKey::new(rng);
        let k_ed = EdScalar::random(rng);
        let nonce = gens.h.mul_tweak(SECP256K1, &Scalar::from(k))?;
        let nonce_ed = gens.h_ed * k_ed;

        let e_other =
            statement.challenge(i, own, &commitment, &commitment_ed, &nonce, &nonce_ed)?;

        let z_other = SecretKey::new(rng);
        let z_other_ed = EdScalar::random(rng);
        let nonce_other = ring_nonce(&gens.h, &z_other, &keys[other], &e_other.secp)?;
        let nonce_other_ed = gens.h_ed * z_other_ed - keys_ed[other] * e_other.ed;

        let e_own = statement.challenge(
            i,
            other,
            &commitment,
            &commitment_ed,
            &nonce_other,
            &nonce_other_ed,
        )?;

        let z_own = blinders[i]
            .mul_tweak(&e_own.secp)?
            .add_tweak(&Scalar::from(k))?;
        let z_own_ed = k_ed + e_own.ed * blinders_ed[i];

        let mut responses = [[0u8; 32]; 2];
        let mut responses_ed = [EdScalar::ZERO; 2];
        responses[own] = z_own.secret_bytes();
        responses[other] = z_other.secret_bytes();
        responses_ed[own] = z_own_ed;
        responses_ed[other] = z_other_ed;

        let challenge = if own == 0 { e_own.bytes } else { e_other.bytes };

        bits.push(BitProof {
            commitment,
            commitment_ed,
            challenge,
            responses,
            responses_ed,
        });
    }

    Ok(CrossCurveProof { bits })
}

/// Verify a cross-curve proof for the given pair of points.
#[must_use]
pub fn verify(
    proof: &CrossCurveProof,
    bitcoin_point: &PublicKey,
    monero_point: &EdwardsPoint,
) -> bool {
    verify_inner(proof, bitcoin_point, monero_point).unwrap_or(false)
}

fn verify_inner(
    proof: &CrossCurveProof,
    bitcoin_point: &PublicKey,
    monero_point: &EdwardsPoint,
) -> Result<bool> {
    if proof.bits.len() != BITS {
        return Err(CryptoError::InvalidProof(format!(
            "expected {BITS} bit proofs, got {}",
            proof.bits.len()
        )));
    }
    let gens = Generators::new()?;
    let statement = Statement {
        bitcoin_point: *bitcoin_point,
        monero_point: monero_point.compress(),
    };
    let neg_g = gens.g.negate(SECP256K1);

    let mut points_ed = Vec::with_capacity(BITS);
    for (i, bit) in proof.bits.iter().enumerate() {
        let commitment_ed = bit
            .commitment_ed
            .decompress()
            .ok_or_else(|| CryptoError::InvalidProof("commitment is not an ed25519 point".into()))?;

        let keys = [bit.commitment, bit.commitment.combine(&neg_g)?];
        let keys_ed = [commitment_ed, commitment_ed - gens.g_ed];
        let z = [
            SecretKey::from_slice(&bit.responses[0])?,
            SecretKey::from_slice(&bit.responses[1])?,
        ];

        let e0 = Challenge::from_bytes(bit.challenge)?;
        let r0 = ring_nonce(&gens.h, &z[0], &keys[0], &e0.secp)?;
        let r0_ed = gens.h_ed * bit.responses_ed[0] - keys_ed[0] * e0.ed;

        let e1 = statement.challenge(i, 0, &bit.commitment, &bit.commitment_ed, &r0, &r0_ed)?;
        let r1 = ring_nonce(&gens.h, &z[1], &keys[1], &e1.secp)?;
        let r1_ed = gens.h_ed * bit.responses_ed[1] - keys_ed[1] * e1.ed;

        let e0_check = statement.challenge(i, 1, &bit.commitment, &bit.commitment_ed, &r1, &r1_ed)?;
        if e0_check.bytes != bit.challenge {
            return Ok(false);
        }
        points_ed.push(commitment_ed);
    }

    let two = two()?;
    let mut acc = proof.bits[BITS - 1].commitment;
    for bit in proof.bits[..BITS - 1].iter().rev() {
        acc = acc.mul_tweak(SECP256K1, &two)?.combine(&bit.commitment)?;
    }

    let mut acc_ed = points_ed[BITS - 1];
    for point in points_ed[..BITS - 1].iter().rev() {
        acc_ed = acc_ed + acc_ed + point;
    }

    Ok(acc == *bitcoin_point && acc_ed == *monero_point)
}
