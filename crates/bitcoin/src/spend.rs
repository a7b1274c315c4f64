//! Cooperative spends of a joint output.
//!
//! Redeem, cancel, refund and punish all spend a joint output through its
//! single tapleaf and differ only in the spent outpoint, the input sequence
//! and the destination. `JointSpend` carries that shared shape: the sighash,
//! plain and encrypted signing, completion and signature extraction.

use adaptor::EncryptedSignature;
use bitcoin::secp256k1::{schnorr::Signature, PublicKey, SecretKey, SECP256K1};
use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Weight, Witness,
};

use crate::fee::FeePolicy;
use crate::taproot::{compute_script_sighash, JointOutput};
use crate::{BitcoinError, Result};

/// A one-input, one-output transaction spending a joint output.
#[derive(Clone, Debug)]
pub struct JointSpend {
    tx: Transaction,
    prevout: TxOut,
    spent: JointOutput,
    keys: (PublicKey, PublicKey),
}

impl JointSpend {
    /// Builds the spend, deducting the fee the policy charges for its final weight.
    ///
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the fee or dust rules
    /// leave nothing to spend.
    pub(crate) fn new(
        outpoint: OutPoint,
        prevout: TxOut,
        spent: JointOutput,
        keys: (PublicKey, PublicKey),
        sequence: Sequence,
        destination: ScriptBuf,
        fee: &FeePolicy,
    ) -> Result<Self> {
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::ZERO,
                script_pubkey: destination,
            }],
        };

        let weight = estimate_weight(&tx, &spent)?;
        tx.output[0].value =
            fee.output_value(prevout.value, weight, &tx.output[0].script_pubkey)?;

        Ok(Self {
            tx,
            prevout,
            spent,
            keys,
        })
    }

    #[must_use]
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    #[must_use]
    pub fn spent_outpoint(&self) -> OutPoint {
        self.tx.input[0].previous_output
    }

    #[must_use]
    pub fn sequence(&self) -> Sequence {
        self.tx.input[0].sequence
    }

    /// The single output, at index 0.
    #[must_use]
    pub fn output(&self) -> &TxOut {
        &self.tx.output[0]
    }

    /// The transaction without witness.
    #[must_use]
    pub fn unsigned(&self) -> &Transaction {
        &self.tx
    }

    /// Maker and taker keys, in script order.
    #[must_use]
    pub fn keys(&self) -> (PublicKey, PublicKey) {
        self.keys
    }

    pub(crate) fn spent_joint(&self) -> &JointOutput {
        &self.spent
    }

    /// Script-path sighash both parties sign.
    ///
    /// # Errors
    /// Returns `BitcoinError::Sighash` if the sighash cannot be computed.
    pub fn digest(&self) -> Result<[u8; 32]> {
        compute_script_sighash(
            &self.tx,
            0,
            std::slice::from_ref(&self.prevout),
            self.spent.leaf_script(),
        )
    }

    /// # Errors
    /// Returns `BitcoinError::Sighash` if the sighash cannot be computed.
    pub fn sign(&self, key: &SecretKey) -> Result<Signature> {
        Ok(adaptor::sign(SECP256K1, key, &self.digest()?))
    }

    /// # Errors
    /// Returns `BitcoinError::InvalidSignature` if `sig` is not `signer`'s
    /// signature over this spend.
    pub fn verify_signature(&self, signer: &PublicKey, sig: &Signature) -> Result<()> {
        adaptor::verify(SECP256K1, signer, &self.digest()?, sig).map_err(|_| {
            BitcoinError::InvalidSignature(format!("bad signature for {}", self.txid()))
        })
    }

    /// Encrypts this party's signature under `adaptor_point`.
    ///
    /// # Errors
    /// Returns `BitcoinError::Crypto` if encryption fails.
    pub fn encsign(
        &self,
        key: &SecretKey,
        adaptor_point: &PublicKey,
    ) -> Result<EncryptedSignature> {
        Ok(adaptor::encrypt_signature(
            SECP256K1,
            key,
            &self.digest()?,
            adaptor_point,
        )?)
    }

    /// # Errors
    /// Returns `BitcoinError::InvalidSignature` if the encrypted signature
    /// does not verify for `signer` and `adaptor_point`.
    pub fn verify_encsig(
        &self,
        signer: &PublicKey,
        adaptor_point: &PublicKey,
        encsig: &EncryptedSignature,
    ) -> Result<()> {
        let digest = self.digest()?;
        if adaptor::verify_encrypted_signature(SECP256K1, encsig, &digest, signer, adaptor_point) {
            Ok(())
        } else {
            Err(BitcoinError::InvalidSignature(format!(
                "bad encrypted signature for {}",
                self.txid()
            )))
        }
    }

    /// Attaches both signatures, checking each one first.
    ///
    /// # Errors
    /// Returns `BitcoinError::InvalidSignature` if either signature is invalid.
    pub fn complete(&self, sig_a: &Signature, sig_b: &Signature) -> Result<Transaction> {
        let (a, b) = self.keys;
        self.verify_signature(&a, sig_a)?;
        self.verify_signature(&b, sig_b)?;

        let mut tx = self.tx.clone();
        tx.input[0].witness = self.spent.witness(sig_a, sig_b)?;
        Ok(tx)
    }

    /// Finds `key`'s signature in the witness of a published copy of this spend.
    ///
    /// # Errors
    /// Returns `BitcoinError::InvalidSignature` if the transaction does not
    /// spend the same outpoint or carries no valid signature for `key`.
    pub fn extract_signature_by_key(
        &self,
        published: &Transaction,
        key: &PublicKey,
    ) -> Result<Signature> {
        let outpoint = self.spent_outpoint();
        let input = published
            .input
            .iter()
            .find(|input| input.previous_output == outpoint)
            .ok_or_else(|| {
                BitcoinError::InvalidSignature(format!(
                    "{} does not spend {outpoint}",
                    published.compute_txid()
                ))
            })?;

        let digest = self.digest()?;
        input
            .witness
            .iter()
            .take(2)
            .filter_map(|item| Signature::from_slice(item).ok())
            .find(|sig| adaptor::verify(SECP256K1, key, &digest, sig).is_ok())
            .ok_or_else(|| {
                BitcoinError::InvalidSignature(format!(
                    "no signature for {key} in {}",
                    published.compute_txid()
                ))
            })
    }
}

/// Weight with a full script-path witness in place.
fn estimate_weight(tx: &Transaction, spent: &JointOutput) -> Result<Weight> {
    let placeholder = Signature::from_slice(&[0u8; 64])
        .map_err(|e| BitcoinError::Transaction(e.to_string()))?;
    let mut sized = tx.clone();
    sized.input[0].witness = spent.witness(&placeholder, &placeholder)?;
    Ok(sized.weight())
}
