//! Swap against live regtest and stagenet daemons.
//!
//! Requires an Esplora instance on localhost:3000 whose wallet key is
//! funded, and two monero-wallet-rpc instances on localhost:18083 (maker,
//! funded) and localhost:18084 (taker).
//! Run with: `cargo test --test regtest -- --ignored --test-threads=1`

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Amount, Network};
use caravel_bitcoin::{EsploraClient, EsploraWallet, FeePolicy};
use caravel_monero::WalletRpc;
use protocol::alice::{self, AliceContext, AliceState};
use protocol::bob::{self, BobContext, BobState};
use protocol::{
    channel_pair, FixedRateOracle, MemoryStore, Message, QuotePolicy, Rate, SwapConfig, SwapId,
};

fn bitcoin_key(var: &str) -> Result<SecretKey> {
    let hex = std::env::var(var).with_context(|| format!("{var} not set"))?;
    hex.parse().with_context(|| format!("{var} is not a secret key"))
}

#[tokio::test]
#[ignore = "requires regtest Esplora and two stagenet monero-wallet-rpc instances"]
async fn live_swap() -> Result<()> {
    let config = SwapConfig::regtest();
    let esplora = EsploraClient::new("http://localhost:3000");
    let id = SwapId::random();
    let (maker_channel, taker_channel) = channel_pair(id);

    let mut maker = AliceContext {
        swap_id: id,
        bitcoin: Arc::new(EsploraWallet::new(
            esplora.clone(),
            bitcoin_key("CARAVEL_MAKER_BTC_KEY")?,
            Network::Regtest,
            FeePolicy::default(),
        )),
        monero: Arc::new(WalletRpc::new("http://localhost:18083", "maker")),
        store: Arc::new(MemoryStore::new()),
        channel: maker_channel,
        config: config.clone(),
    };
    let mut taker = BobContext {
        swap_id: id,
        bitcoin: Arc::new(EsploraWallet::new(
            esplora,
            bitcoin_key("CARAVEL_TAKER_BTC_KEY")?,
            Network::Regtest,
            FeePolicy::default(),
        )),
        monero: Arc::new(WalletRpc::new("http://localhost:18084", "taker")),
        store: Arc::new(MemoryStore::new()),
        channel: taker_channel,
        config,
    };

    let rate = Rate::new(caravel_monero::XmrAmount::from_xmr_str("150").context("rate")?);
    let oracle = FixedRateOracle::new(rate);
    let maker_side = async {
        let Message::SwapRequest(request) = maker.channel.recv().await? else {
            bail!("expected a swap request");
        };
        let state = alice::negotiate(&mut maker, request.btc, &oracle, &QuotePolicy::default()).await?;
        Ok(alice::run(&mut maker, state).await?)
    };
    let taker_side = async {
        let state = bob::negotiate(&mut taker, Amount::from_sat(100_000)).await?;
        Ok::<_, anyhow::Error>(bob::run(&mut taker, state).await?)
    };
    let (maker_end, taker_end) = tokio::join!(maker_side, taker_side);

    let maker_end: AliceState = maker_end?;
    let taker_end: BobState = taker_end?;
    assert!(matches!(maker_end, AliceState::BtcRedeemed { .. }));
    assert!(matches!(taker_end, BobState::XmrSwept { .. }));
    Ok(())
}
