//! Taproot (P2TR) outputs and signature hashing.
//!
//! The swap's joint output commits to a single tapleaf
//! `<A> OP_CHECKSIGVERIFY <B> OP_CHECKSIG` under an unspendable internal key,
//! so every spend needs a BIP340 signature from both parties. The wallet's own
//! funds live in plain key-path P2TR outputs.

use bitcoin::{
    consensus::encode::serialize_hex,
    hashes::Hash,
    opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY},
    script::Builder,
    secp256k1::{self, schnorr::Signature, PublicKey, Secp256k1, XOnlyPublicKey},
    sighash::{Prevouts, SighashCache, TapSighashType},
    taproot::{ControlBlock, LeafVersion, TapLeafHash, TapTweakHash, TaprootBuilder, TaprootSpendInfo},
    Address, Amount, Network, ScriptBuf, Transaction, TxOut, Witness,
};

use crate::{BitcoinError, Result};

/// BIP341 "nothing up my sleeve" x-only key with no known discrete log.
const NUMS_INTERNAL_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// Returns the unspendable internal key used for joint outputs.
///
/// # Errors
/// Returns `BitcoinError::Taproot` if the constant fails to parse.
pub fn nums_internal_key() -> Result<XOnlyPublicKey> {
    XOnlyPublicKey::from_slice(&NUMS_INTERNAL_KEY)
        .map_err(|e| BitcoinError::Taproot(format!("NUMS key: {e}")))
}

/// Builds the 2-of-2 leaf script `<A> OP_CHECKSIGVERIFY <B> OP_CHECKSIG`.
#[must_use]
pub fn joint_script(a: &PublicKey, b: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(&a.x_only_public_key().0)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_x_only_key(&b.x_only_public_key().0)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// The joint output both parties must sign to spend.
#[derive(Clone, Debug)]
pub struct JointOutput {
    script: ScriptBuf,
    spend_info: TaprootSpendInfo,
    network: Network,
}

impl JointOutput {
    /// Builds the joint output for the maker key `a` and taker key `b`.
    ///
    /// # Errors
    /// Returns `BitcoinError::Taproot` if the taproot tree cannot be finalized.
    pub fn new<C: secp256k1::Verification>(
        secp: &Secp256k1<C>,
        a: &PublicKey,
        b: &PublicKey,
        network: Network,
    ) -> Result<Self> {
        let script = joint_script(a, b);
        let spend_info = TaprootBuilder::new()
            .add_leaf(0, script.clone())
            .map_err(|e| BitcoinError::Taproot(e.to_string()))?
            .finalize(secp, nums_internal_key()?)
            .map_err(|_| BitcoinError::Taproot("incomplete taproot tree".into()))?;

        Ok(Self {
            script,
            spend_info,
            network,
        })
    }

    #[must_use]
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.spend_info.output_key())
    }

    #[must_use]
    pub fn address(&self) -> Address {
        Address::p2tr_tweaked(self.spend_info.output_key(), self.network)
    }

    #[must_use]
    pub fn leaf_script(&self) -> &ScriptBuf {
        &self.script
    }

    #[must_use]
    pub fn txout(&self, amount: Amount) -> TxOut {
        TxOut {
            value: amount,
            script_pubkey: self.script_pubkey(),
        }
    }

    /// Control block proving the leaf is committed to by the output key.
    ///
    /// # Errors
    /// Returns `BitcoinError::Taproot` if the leaf is missing from the tree.
    pub fn control_block(&self) -> Result<ControlBlock> {
        self.spend_info
            .control_block(&(self.script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| BitcoinError::Taproot("leaf not in taproot tree".into()))
    }

    /// Script-path witness: `[sig_B, sig_A, leaf_script, control_block]`.
    ///
    /// # Errors
    /// Returns `BitcoinError::Taproot` if the control block cannot be built.
    pub fn witness(&self, sig_a: &Signature, sig_b: &Signature) -> Result<Witness> {
        let mut witness = Witness::new();
        witness.push(sig_b.serialize());
        witness.push(sig_a.serialize());
        witness.push(self.script.as_bytes());
        witness.push(self.control_block()?.serialize());
        Ok(witness)
    }
}

/// Computes the BIP341 script-path sighash for a joint output spend.
///
/// # Errors
/// Returns `BitcoinError::Sighash` if the sighash computation fails.
pub fn compute_script_sighash(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    leaf_script: &ScriptBuf,
) -> Result<[u8; 32]> {
    let mut cache = SighashCache::new(tx);
    let leaf_hash = TapLeafHash::from_script(leaf_script, LeafVersion::TapScript);
    let sighash = cache
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| BitcoinError::Sighash(e.to_string()))?;

    Ok(sighash.to_byte_array())
}

/// Computes the Taproot key-spend sighash for an input.
///
/// # Errors
/// Returns `BitcoinError::Sighash` if the sighash computation fails.
pub fn compute_taproot_sighash(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
) -> Result<[u8; 32]> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .taproot_key_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            TapSighashType::Default,
        )
        .map_err(|e| BitcoinError::Sighash(e.to_string()))?;

    Ok(sighash.to_byte_array())
}

/// Builds a Taproot key-path spend witness from a Schnorr signature.
///
/// For `TapSighashType::Default`, only the 64-byte signature is needed.
#[must_use]
pub fn build_keypath_witness(sig: &Signature) -> Witness {
    let mut witness = Witness::new();
    witness.push(sig.serialize());
    witness
}

/// Computes the taproot-tweaked secret key for P2TR key-path spending.
///
/// For a P2TR output with no script tree, the output key `Q = P + t*G`
/// where `t = H_TapTweak(P)`. The signing key must be similarly tweaked:
/// `q = p + t` (with parity adjustment handled by `add_xonly_tweak`).
///
/// # Errors
/// Returns `BitcoinError::Taproot` if the tweak operation fails.
pub fn compute_tweaked_secret_key(
    secp: &Secp256k1<secp256k1::All>,
    sk: &secp256k1::SecretKey,
) -> Result<secp256k1::SecretKey> {
    let keypair = secp256k1::Keypair::from_secret_key(secp, sk);
    let (x_only, _) = XOnlyPublicKey::from_keypair(&keypair);
    let tweak = TapTweakHash::from_key_and_tweak(x_only, None).to_scalar();
    let tweaked_kp = keypair
        .add_xonly_tweak(secp, &tweak)
        .map_err(|e| BitcoinError::Taproot(format!("taproot tweak failed: {e}")))?;
    Ok(secp256k1::SecretKey::from_keypair(&tweaked_kp))
}

/// Serializes a transaction to hex for broadcasting via Esplora.
#[must_use]
pub fn tx_to_hex(tx: &Transaction) -> String {
    serialize_hex(tx)
}
