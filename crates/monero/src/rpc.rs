//! `monero-wallet-rpc` JSON-RPC client.
//!
//! The daemon keeps one wallet open at a time. The main wallet pays lock
//! transfers; a per-swap wallet is created from the joint keys only to
//! sweep, after which the main wallet is reopened.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::amount::XmrAmount;
use crate::keys::JointAccount;
use crate::wallet::{MoneroWallet, TransferCheck, TransferProof, TxHash};
use crate::{MoneroError, Result};

#[derive(Debug, Clone)]
pub struct WalletRpc {
    client: reqwest::Client,
    url: String,
    main_wallet: String,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct TransferResult {
    tx_hash: String,
    tx_key: String,
}

#[derive(Debug, Deserialize)]
struct SweepResult {
    #[serde(default)]
    tx_hash_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    unlocked_balance: u64,
}

#[derive(Debug, Deserialize)]
struct AddressResult {
    address: String,
}

#[derive(Debug, Deserialize)]
struct HeightResult {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct CheckTxKeyResult {
    confirmations: u64,
    in_pool: bool,
    received: u64,
}

#[derive(Debug, Deserialize)]
struct Destination {
    address: String,
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct OutgoingTransfer {
    txid: String,
    #[serde(default)]
    destinations: Vec<Destination>,
}

#[derive(Debug, Deserialize)]
struct TransfersResult {
    #[serde(default)]
    out: Vec<OutgoingTransfer>,
}

#[derive(Debug, Deserialize)]
struct TxKeyResult {
    tx_key: String,
}

impl WalletRpc {
    /// `url` is the daemon root, e.g. `http://127.0.0.1:18083`.
    #[must_use]
    pub fn new(url: &str, main_wallet: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/json_rpc", url.trim_end_matches('/')),
            main_wallet: main_wallet.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        debug!(method, "wallet rpc call");
        let body = json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MoneroError::Rpc(format!("{method} failed: {e}")))?
            .json()
            .await
            .map_err(|e| MoneroError::Rpc(format!("invalid {method} response: {e}")))?;

        if let Some(error) = response.error {
            return Err(MoneroError::Rpc(format!(
                "{method} returned {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| MoneroError::Rpc(format!("{method} returned no result")))
    }

    /// Makes the main wallet current again.
    ///
    /// # Errors
    /// Returns `MoneroError::Rpc` if the wallet cannot be opened.
    pub async fn open_main_wallet(&self) -> Result<()> {
        let _: Value = self
            .call(
                "open_wallet",
                json!({ "filename": self.main_wallet, "password": "" }),
            )
            .await?;
        Ok(())
    }

    async fn tx_key(&self, txid: &str) -> Result<String> {
        let result: TxKeyResult = self.call("get_tx_key", json!({ "txid": txid })).await?;
        Ok(result.tx_key)
    }
}

#[async_trait]
impl MoneroWallet for WalletRpc {
    async fn create_account_from_key(&self, account: &JointAccount) -> Result<()> {
        let generated: Result<Value> = self
            .call(
                "generate_from_keys",
                json!({
                    "restore_height": account.restore_height,
                    "filename": account.name,
                    "address": account.address.to_string(),
                    "spendkey": account.spend_key.to_string(),
                    "viewkey": account.view_key.to_string(),
                    "password": "",
                    "autosave_current": true,
                }),
            )
            .await;
        match generated {
            Ok(_) => {}
            // A previous attempt created the wallet file before failing.
            Err(MoneroError::Rpc(msg)) if msg.contains("already exists") => {
                debug!(wallet = %account.name, "Joint wallet exists; opening it");
                let _: Value = self
                    .call(
                        "open_wallet",
                        json!({ "filename": account.name, "password": "" }),
                    )
                    .await?;
            }
            Err(e) => return Err(e),
        }
        let _: Value = self
            .call("refresh", json!({ "start_height": account.restore_height }))
            .await?;
        info!(wallet = %account.name, "Opened joint wallet");
        Ok(())
    }

    async fn transfer(
        &self,
        address: &monero::Address,
        amount: XmrAmount,
    ) -> Result<TransferProof> {
        let available = self.get_balance().await?;
        if available < amount {
            return Err(MoneroError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        let result: TransferResult = self
            .call(
                "transfer",
                json!({
                    "destinations": [{ "amount": amount.as_pico(), "address": address.to_string() }],
                    "get_tx_key": true,
                }),
            )
            .await?;
        info!(tx_hash = %result.tx_hash, %amount, "Sent Monero transfer");
        Ok(TransferProof {
            tx_hash: TxHash(result.tx_hash),
            tx_key: result.tx_key,
        })
    }

    async fn sweep_all(&self, address: &monero::Address) -> Result<Vec<TxHash>> {
        let result: SweepResult = self
            .call("sweep_all", json!({ "address": address.to_string() }))
            .await?;
        self.open_main_wallet().await?;
        Ok(result.tx_hash_list.into_iter().map(TxHash).collect())
    }

    async fn main_address(&self) -> Result<monero::Address> {
        let result: AddressResult = self
            .call("get_address", json!({ "account_index": 0 }))
            .await?;
        result
            .address
            .parse()
            .map_err(|e: monero::util::address::Error| MoneroError::Key(e.to_string()))
    }

    async fn get_balance(&self) -> Result<XmrAmount> {
        let result: BalanceResult = self
            .call("get_balance", json!({ "account_index": 0 }))
            .await?;
        Ok(XmrAmount::from_pico(result.unlocked_balance))
    }

    async fn block_height(&self) -> Result<u64> {
        let result: HeightResult = self.call("get_height", json!({})).await?;
        Ok(result.height)
    }

    async fn check_tx_key(
        &self,
        tx_hash: &TxHash,
        tx_key: &str,
        address: &monero::Address,
    ) -> Result<TransferCheck> {
        let result: CheckTxKeyResult = self
            .call(
                "check_tx_key",
                json!({
                    "txid": tx_hash.0,
                    "tx_key": tx_key,
                    "address": address.to_string(),
                }),
            )
            .await?;
        Ok(TransferCheck {
            received: XmrAmount::from_pico(result.received),
            confirmations: result.confirmations,
            in_pool: result.in_pool,
        })
    }

    async fn find_outgoing_transfer(
        &self,
        address: &monero::Address,
        amount: XmrAmount,
        since_height: u64,
    ) -> Result<Option<TransferProof>> {
        let result: TransfersResult = self
            .call(
                "get_transfers",
                json!({
                    "out": true,
                    "pending": true,
                    "pool": true,
                    "filter_by_height": true,
                    "min_height": since_height.saturating_sub(1),
                }),
            )
            .await?;

        let address = address.to_string();
        let Some(found) = result.out.into_iter().find(|transfer| {
            transfer
                .destinations
                .iter()
                .any(|d| d.address == address && d.amount == amount.as_pico())
        }) else {
            return Ok(None);
        };

        let tx_key = self.tx_key(&found.txid).await?;
        Ok(Some(TransferProof {
            tx_hash: TxHash(found.txid),
            tx_key,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_appends_json_rpc_path() {
        let rpc = WalletRpc::new("http://127.0.0.1:18083/", "main");
        assert_eq!(rpc.url, "http://127.0.0.1:18083/json_rpc");
    }

    #[test]
    fn error_response_deserializes() {
        let json = r#"{"id":"0","jsonrpc":"2.0","error":{"code":-13,"message":"No wallet file"}}"#;
        let response: RpcResponse<HeightResult> = serde_json::from_str(json).unwrap();
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -13);
        assert_eq!(error.message, "No wallet file");
    }

    #[test]
    fn transfers_without_out_field_deserialize() {
        let json = r#"{"id":"0","jsonrpc":"2.0","result":{}}"#;
        let response: RpcResponse<TransfersResult> = serde_json::from_str(json).unwrap();
        assert!(response.result.unwrap().out.is_empty());
    }

    #[test]
    fn check_tx_key_deserializes() {
        let json = r#"{"confirmations":3,"in_pool":false,"received":1500000000000}"#;
        let result: CheckTxKeyResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.received, 1_500_000_000_000);
        assert_eq!(result.confirmations, 3);
    }

    #[tokio::test]
    #[ignore = "requires monero-wallet-rpc on localhost:18083"]
    async fn reads_height_from_daemon() {
        let rpc = WalletRpc::new("http://127.0.0.1:18083", "main");
        assert!(rpc.block_height().await.expect("height") > 0);
    }
}
