//! Esplora REST client.
//!
//! Broadcasts transactions, queries UTXOs and transactions, and reports
//! confirmation status and chain height.

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{Transaction, Txid};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{BitcoinError, Result};

/// Esplora REST API client.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: reqwest::Client,
    base_url: String,
}

/// Transaction confirmation status as reported by Esplora.
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxStatus {
    /// Whether the transaction is confirmed in a block.
    pub confirmed: bool,
    /// Block height if confirmed.
    pub block_height: Option<u32>,
}

/// Unspent transaction output.
#[derive(Debug, Clone, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    pub status: EsploraTxStatus,
}

fn transport(e: reqwest::Error) -> BitcoinError {
    BitcoinError::Esplora(e.to_string())
}

impl EsploraClient {
    /// Creates a new client with a custom base URL.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Broadcasts a raw transaction to the network.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if broadcast fails. The error text of
    /// the node is kept so callers can recognise "already known" rejections.
    pub async fn broadcast(&self, tx_hex: &str) -> Result<Txid> {
        let url = format!("{}/tx", self.base_url);
        let response = self
            .client
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BitcoinError::Esplora(format!(
                "broadcast failed: {error_text}"
            )));
        }

        let body = response.text().await.map_err(transport)?;
        body.trim()
            .parse()
            .map_err(|e| BitcoinError::Esplora(format!("invalid txid in response: {e}")))
    }

    /// Gets the confirmation status of a transaction, `None` if unknown.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if the query fails.
    pub async fn get_tx_status(&self, txid: &Txid) -> Result<Option<EsploraTxStatus>> {
        let url = format!("{}/tx/{txid}/status", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(BitcoinError::Esplora(format!(
                "failed to get tx status: {status}"
            )));
        }

        response.json().await.map(Some).map_err(transport)
    }

    /// Fetches a transaction with witness, `None` if unknown.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if the query fails or returns garbage.
    pub async fn get_tx(&self, txid: &Txid) -> Result<Option<Transaction>> {
        let url = format!("{}/tx/{txid}/hex", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(BitcoinError::Esplora(format!("failed to get tx: {status}")));
        }

        let hex = response.text().await.map_err(transport)?;
        let tx = deserialize_hex(hex.trim())
            .map_err(|e| BitcoinError::Esplora(format!("invalid tx hex: {e}")))?;
        Ok(Some(tx))
    }

    /// Gets all UTXOs for an address.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if the query fails.
    pub async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let url = format!("{}/address/{address}/utxo", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BitcoinError::Esplora(format!(
                "failed to get utxos: {status}"
            )));
        }

        let utxos: Vec<Utxo> = response.json().await.map_err(transport)?;
        debug!(address, count = utxos.len(), "Fetched UTXOs");
        Ok(utxos)
    }

    /// Gets the total balance (sum of UTXO values) for an address.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if the query fails.
    pub async fn get_balance(&self, address: &str) -> Result<u64> {
        let utxos = self.get_utxos(address).await?;
        Ok(utxos.iter().map(|u| u.value).sum())
    }

    /// Gets the current block height.
    ///
    /// # Errors
    /// Returns `BitcoinError::Esplora` if the query fails.
    pub async fn get_block_height(&self) -> Result<u32> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BitcoinError::Esplora(format!(
                "failed to get block height: {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(transport)?
            .trim()
            .parse()
            .map_err(|e| BitcoinError::Esplora(format!("invalid height: {e}")))
    }
}
