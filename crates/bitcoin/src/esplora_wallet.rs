//! Single-key P2TR wallet over the Esplora REST API.
//!
//! Coin selection and signing happen under one mutex so concurrently running
//! swaps never pick the same UTXO.

use std::collections::HashSet;

use async_trait::async_trait;
use bitcoin::secp256k1::{self, Secp256k1, SecretKey};
use bitcoin::{
    absolute::LockTime, transaction::Version, Address, Amount, Network, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Weight, Witness,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::esplora::EsploraClient;
use crate::fee::FeePolicy;
use crate::taproot::{
    build_keypath_witness, compute_taproot_sighash, compute_tweaked_secret_key, tx_to_hex,
};
use crate::wallet::{BitcoinWallet, TxStatus};
use crate::{BitcoinError, Result};

/// Node rejections meaning the transaction is already known.
const ALREADY_KNOWN: [&str; 4] = [
    "txn-already-known",
    "txn-already-in-mempool",
    "txn-same-nonwitness-data-in-mempool",
    "already in block chain",
];

pub struct EsploraWallet {
    client: EsploraClient,
    secp: Secp256k1<secp256k1::All>,
    secret: SecretKey,
    network: Network,
    fee: FeePolicy,
    reserved: Mutex<HashSet<OutPoint>>,
}

impl EsploraWallet {
    #[must_use]
    pub fn new(
        client: EsploraClient,
        secret: SecretKey,
        network: Network,
        fee: FeePolicy,
    ) -> Self {
        Self {
            client,
            secp: Secp256k1::new(),
            secret,
            network,
            fee,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// The wallet's single receive address.
    #[must_use]
    pub fn address(&self) -> Address {
        let (x_only, _) = self.secret.public_key(&self.secp).x_only_public_key();
        Address::p2tr(&self.secp, x_only, None, self.network)
    }

    fn script_pubkey(&self) -> ScriptBuf {
        self.address().script_pubkey()
    }

    /// Confirmed plus unconfirmed balance.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if the query fails.
    pub async fn balance(&self) -> Result<Amount> {
        let sats = self.client.get_balance(&self.address().to_string()).await?;
        Ok(Amount::from_sat(sats))
    }

    /// Weight of `tx` once every input carries a key-path signature.
    fn funded_weight(&self, tx: &Transaction, with_change: bool) -> Weight {
        let mut sized = tx.clone();
        for input in &mut sized.input {
            input.witness = Witness::from_slice(&[[0u8; 64]]);
        }
        if with_change {
            sized.output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: self.script_pubkey(),
            });
        }
        sized.weight()
    }

    /// Drops the reservations held by `tx`, returning how many there were.
    async fn unreserve(&self, tx: &Transaction) -> usize {
        let mut reserved = self.reserved.lock().await;
        tx.input
            .iter()
            .filter(|input| reserved.remove(&input.previous_output))
            .count()
    }

    async fn prevouts(&self, tx: &Transaction) -> Result<Vec<TxOut>> {
        let own = self.script_pubkey();
        let mut prevouts = Vec::with_capacity(tx.input.len());
        for input in &tx.input {
            let outpoint = input.previous_output;
            let prev = self.client.get_tx(&outpoint.txid).await?.ok_or_else(|| {
                BitcoinError::Transaction(format!("unknown input transaction {}", outpoint.txid))
            })?;
            let out = prev
                .output
                .get(outpoint.vout as usize)
                .cloned()
                .ok_or_else(|| BitcoinError::Transaction(format!("missing output {outpoint}")))?;
            if out.script_pubkey != own {
                return Err(BitcoinError::Transaction(format!(
                    "input {outpoint} is not owned by this wallet"
                )));
            }
            prevouts.push(out);
        }
        Ok(prevouts)
    }
}

#[async_trait]
impl BitcoinWallet for EsploraWallet {
    async fn build_tx(&self, script_pubkey: ScriptBuf, amount: Amount) -> Result<Transaction> {
        let mut reserved = self.reserved.lock().await;
        let utxos = self.client.get_utxos(&self.address().to_string()).await?;

        let mut candidates: Vec<_> = utxos
            .into_iter()
            .filter(|u| u.status.confirmed && !reserved.contains(&OutPoint::new(u.txid, u.vout)))
            .collect();
        candidates.sort_by(|a, b| b.value.cmp(&a.value));

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: Vec::new(),
            output: vec![TxOut {
                value: amount,
                script_pubkey,
            }],
        };

        let mut selected = Amount::ZERO;
        for utxo in candidates {
            tx.input.push(TxIn {
                previous_output: OutPoint::new(utxo.txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
            selected += Amount::from_sat(utxo.value);
            let fee = self.fee.fee_for_weight(self.funded_weight(&tx, true))?;
            if selected >= amount + fee {
                break;
            }
        }

        let fee = self.fee.fee_for_weight(self.funded_weight(&tx, true))?;
        let needed = amount + fee;
        if tx.input.is_empty() || selected < needed {
            return Err(BitcoinError::InsufficientFunds {
                needed,
                available: selected,
            });
        }

        let change = selected - needed;
        let own = self.script_pubkey();
        if change >= own.minimal_non_dust() {
            tx.output.push(TxOut {
                value: change,
                script_pubkey: own,
            });
        }

        for input in &tx.input {
            reserved.insert(input.previous_output);
        }
        debug!(
            inputs = tx.input.len(),
            %amount,
            %fee,
            "Funded transaction"
        );
        Ok(tx)
    }

    async fn release(&self, tx: &Transaction) {
        if self.unreserve(tx).await > 0 {
            debug!(txid = %tx.compute_txid(), "Released unpublished inputs");
        }
    }

    async fn sign(&self, mut tx: Transaction) -> Result<Transaction> {
        let _guard = self.reserved.lock().await;
        let prevouts = self.prevouts(&tx).await?;
        let tweaked = compute_tweaked_secret_key(&self.secp, &self.secret)?;
        let keypair = secp256k1::Keypair::from_secret_key(&self.secp, &tweaked);

        let mut witnesses = Vec::with_capacity(tx.input.len());
        for index in 0..tx.input.len() {
            let sighash = compute_taproot_sighash(&tx, index, &prevouts)?;
            let msg = secp256k1::Message::from_digest(sighash);
            let sig = self.secp.sign_schnorr(&msg, &keypair);
            witnesses.push(build_keypath_witness(&sig));
        }
        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }
        Ok(tx)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        let txid = tx.compute_txid();
        match self.client.broadcast(&tx_to_hex(tx)).await {
            Ok(published) => {
                info!(%txid, "Broadcast transaction");
                self.unreserve(tx).await;
                Ok(published)
            }
            Err(BitcoinError::Esplora(msg)) if ALREADY_KNOWN.iter().any(|k| msg.contains(k)) => {
                warn!(%txid, "Transaction already known, treating broadcast as done");
                Ok(txid)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_confirmations(&self, txid: Txid) -> Result<TxStatus> {
        let Some(status) = self.client.get_tx_status(&txid).await? else {
            return Ok(TxStatus::Unseen);
        };
        match (status.confirmed, status.block_height) {
            (true, Some(height)) => {
                let tip = self.client.get_block_height().await?;
                Ok(TxStatus::Confirmed {
                    depth: tip.saturating_sub(height) + 1,
                })
            }
            _ => Ok(TxStatus::InMempool),
        }
    }

    async fn current_height(&self) -> Result<u32> {
        self.client.get_block_height().await
    }

    async fn get_transaction(&self, txid: Txid) -> Result<Option<Transaction>> {
        self.client.get_tx(&txid).await
    }

    async fn new_address(&self) -> Result<Address> {
        Ok(self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn wallet() -> EsploraWallet {
        EsploraWallet::new(
            EsploraClient::new("http://localhost:3000"),
            SecretKey::new(&mut rand::thread_rng()),
            Network::Regtest,
            FeePolicy::default(),
        )
    }

    #[test]
    fn address_is_regtest_p2tr() {
        let wallet = wallet();
        assert!(wallet.address().to_string().starts_with("bcrt1p"));
        assert!(wallet.script_pubkey().is_p2tr());
    }

    #[test]
    fn funded_weight_accounts_for_signatures_and_change() {
        let wallet = wallet();
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn::default()],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: wallet.script_pubkey(),
            }],
        };

        let bare = tx.weight();
        let signed = wallet.funded_weight(&tx, false);
        let with_change = wallet.funded_weight(&tx, true);
        assert!(signed > bare);
        assert!(with_change > signed);
    }

    #[tokio::test]
    async fn release_frees_reserved_inputs() {
        let wallet = wallet();
        let kept = OutPoint::new(Txid::all_zeros(), 7);
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0),
                ..TxIn::default()
            }],
            output: Vec::new(),
        };
        {
            let mut reserved = wallet.reserved.lock().await;
            reserved.insert(kept);
            reserved.insert(tx.input[0].previous_output);
        }

        wallet.release(&tx).await;
        assert_eq!(wallet.unreserve(&tx).await, 0);
        assert!(wallet.reserved.lock().await.contains(&kept));
    }

    #[tokio::test]
    #[ignore = "requires a funded wallet on a regtest Esplora at localhost:3000"]
    async fn builds_and_signs_against_regtest() {
        let wallet = wallet();
        let dest = wallet.script_pubkey();
        let tx = wallet
            .build_tx(dest, Amount::from_sat(10_000))
            .await
            .expect("build");
        let signed = wallet.sign(tx).await.expect("sign");
        assert!(signed.input.iter().all(|i| i.witness.len() == 1));
    }
}
