//! TxLock: the taker's funding transaction paying into the joint output.

use bitcoin::secp256k1::{PublicKey, SECP256K1};
use bitcoin::{Amount, Network, OutPoint, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::taproot::JointOutput;
use crate::wallet::BitcoinWallet;
use crate::{BitcoinError, Result};

/// Lock transaction with the position of its joint output.
///
/// Held unsigned by the maker and signed by the taker; the txid is the same
/// either way because every input is segwit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLock {
    tx: Transaction,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    amount: Amount,
    a: PublicKey,
    b: PublicKey,
    network: Network,
    vout: u32,
}

impl TxLock {
    /// Asks the wallet to fund a lock of `amount` into the joint output of `a` and `b`.
    ///
    /// # Errors
    /// Propagates wallet errors, including `BitcoinError::InsufficientFunds`.
    pub async fn new(
        wallet: &dyn BitcoinWallet,
        amount: Amount,
        a: PublicKey,
        b: PublicKey,
        network: Network,
    ) -> Result<Self> {
        let joint = JointOutput::new(SECP256K1, &a, &b, network)?;
        let tx = wallet.build_tx(joint.script_pubkey(), amount).await?;
        let lock = match Self::from_transaction(tx.clone(), amount, a, b, network) {
            Ok(lock) => lock,
            Err(e) => {
                wallet.release(&tx).await;
                return Err(e);
            }
        };
        debug!(txid = %lock.txid(), %amount, "Built lock transaction");
        Ok(lock)
    }

    /// Wraps a received lock transaction, checking it pays exactly `amount`
    /// into the joint output.
    ///
    /// # Errors
    /// Returns `BitcoinError::Transaction` if no output matches.
    pub fn from_transaction(
        tx: Transaction,
        amount: Amount,
        a: PublicKey,
        b: PublicKey,
        network: Network,
    ) -> Result<Self> {
        let joint = JointOutput::new(SECP256K1, &a, &b, network)?;
        let script_pubkey = joint.script_pubkey();
        let vout = tx
            .output
            .iter()
            .position(|out| out.script_pubkey == script_pubkey && out.value == amount)
            .ok_or_else(|| {
                BitcoinError::Transaction(format!(
                    "lock transaction has no joint output of {amount}"
                ))
            })?;
        let vout = u32::try_from(vout)
            .map_err(|_| BitcoinError::Transaction("output index overflow".into()))?;

        Ok(Self {
            tx,
            amount,
            a,
            b,
            network,
            vout,
        })
    }

    #[must_use]
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    #[must_use]
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid(), self.vout)
    }

    #[must_use]
    pub fn output(&self) -> TxOut {
        self.tx.output[self.vout as usize].clone()
    }

    #[must_use]
    pub fn amount(&self) -> Amount {
        self.amount
    }

    #[must_use]
    pub fn keys(&self) -> (PublicKey, PublicKey) {
        (self.a, self.b)
    }

    #[must_use]
    pub fn network(&self) -> Network {
        self.network
    }

    /// # Errors
    /// Returns `BitcoinError::Taproot` if the joint output cannot be rebuilt.
    pub fn joint_output(&self) -> Result<JointOutput> {
        JointOutput::new(SECP256K1, &self.a, &self.b, self.network)
    }

    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    #[must_use]
    pub fn into_transaction(self) -> Transaction {
        self.tx
    }
}
