//! Wiring between the configuration, the wallets and the swap engine.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bitcoin::secp256k1::SecretKey;
use bitcoin::Amount;
use caravel_bitcoin::{BitcoinWallet, EsploraClient, EsploraWallet};
use caravel_monero::{MoneroWallet, WalletRpc};
use protocol::{
    alice, bob, channel_pair, AliceContext, AliceState, BobContext, FixedRateOracle, Message,
    PriceOracle, QuotePolicy, Router, Swap, SwapChannel, SwapConfig, SwapId, SwapStore,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::tcp::TcpTransport;

/// Everything a swap needs apart from its id and channel.
#[derive(Clone)]
struct Engine {
    bitcoin: Arc<dyn BitcoinWallet>,
    monero: Arc<dyn MoneroWallet>,
    store: Arc<dyn SwapStore>,
    config: SwapConfig,
}

impl Engine {
    async fn connect(config: &Config, store: Arc<dyn SwapStore>) -> Result<Self> {
        let key_file = &config.bitcoin.key_file;
        let raw = std::fs::read_to_string(key_file)
            .with_context(|| format!("failed to read {}", key_file.display()))?;
        let secret = SecretKey::from_str(raw.trim())
            .with_context(|| format!("{} does not hold a hex secret key", key_file.display()))?;
        let bitcoin = EsploraWallet::new(
            EsploraClient::new(&config.bitcoin.esplora_url),
            secret,
            config.bitcoin.network,
            config.bitcoin.fee,
        );
        info!(address = %bitcoin.address(), "Bitcoin wallet ready");

        let monero = WalletRpc::new(&config.monero.wallet_rpc_url, &config.monero.wallet_name);
        monero
            .open_main_wallet()
            .await
            .context("failed to open the Monero wallet")?;

        Ok(Self {
            bitcoin: Arc::new(bitcoin),
            monero: Arc::new(monero),
            store,
            config: config.swap_config()?,
        })
    }

    fn alice(&self, swap_id: SwapId, channel: SwapChannel) -> AliceContext {
        AliceContext {
            swap_id,
            bitcoin: self.bitcoin.clone(),
            monero: self.monero.clone(),
            store: self.store.clone(),
            channel,
            config: self.config.clone(),
        }
    }

    fn bob(&self, swap_id: SwapId, channel: SwapChannel) -> BobContext {
        BobContext {
            swap_id,
            bitcoin: self.bitcoin.clone(),
            monero: self.monero.clone(),
            store: self.store.clone(),
            channel,
            config: self.config.clone(),
        }
    }
}

/// A channel whose peer is gone: sends fail and receives end at once.
fn offline_channel(swap_id: SwapId) -> SwapChannel {
    let (channel, peer) = channel_pair(swap_id);
    drop(peer);
    channel
}

async fn dial(peer: &str, swap_id: SwapId) -> SwapChannel {
    match TcpTransport::connect(peer).await {
        Ok(transport) => {
            let (router, _) = Router::spawn(transport);
            router.register(swap_id)
        }
        Err(e) => {
            warn!(%swap_id, peer, error = %e, "Peer unreachable; continuing without it");
            offline_channel(swap_id)
        }
    }
}

/// Continues `swap_id` from its latest recorded state.
///
/// # Errors
/// Fails if the swap is unknown, the wallets are unreachable, or the swap
/// stalls.
pub async fn resume(config: &Config, store: Arc<dyn SwapStore>, swap_id: SwapId) -> Result<()> {
    let swap = store.load_latest(swap_id)?;
    if swap.is_terminal() {
        println!("Swap {swap_id} already finished in {}", swap.name());
        return Ok(());
    }

    let channel = match store.get_peer(swap_id)? {
        Some(peer) => dial(&peer, swap_id).await,
        None => offline_channel(swap_id),
    };
    let engine = Engine::connect(config, store).await?;
    info!(%swap_id, role = %swap.role(), state = swap.name(), "Resuming swap");

    let finished = match swap {
        Swap::Alice(state) => {
            let mut ctx = engine.alice(swap_id, channel);
            alice::run(&mut ctx, state).await?.name()
        }
        Swap::Bob(state) => {
            let mut ctx = engine.bob(swap_id, channel);
            bob::run(&mut ctx, state).await?.name()
        }
    };
    println!("Swap {swap_id} finished in {finished}");
    Ok(())
}

/// Buys XMR for `btc` from the maker at `peer`.
///
/// # Errors
/// Fails if the maker is unreachable, a wallet fails, or the swap stalls.
pub async fn buy(
    config: &Config,
    store: Arc<dyn SwapStore>,
    peer: &str,
    btc: Amount,
) -> Result<()> {
    let transport = TcpTransport::connect(peer)
        .await
        .with_context(|| format!("failed to reach maker at {peer}"))?;
    let engine = Engine::connect(config, store.clone()).await?;

    let swap_id = SwapId::random();
    store.insert_peer(swap_id, peer)?;
    let (router, _incoming) = Router::spawn(transport);
    let mut ctx = engine.bob(swap_id, router.register(swap_id));
    println!("Swap {swap_id}: buying XMR for {btc}");

    let state = bob::negotiate(&mut ctx, btc).await?;
    let state = bob::run(&mut ctx, state).await?;
    println!("Swap {swap_id} finished in {}", state.name());
    Ok(())
}

/// Accepts takers on `listen`, selling XMR at the configured rate.
///
/// Incomplete maker swaps found in the journal are resumed first. Their
/// takers cannot reach them again, so they settle on their own through the
/// timelocked paths.
///
/// # Errors
/// Fails if the configuration has no rate, the wallets are unreachable, or
/// the listener cannot be bound.
pub async fn serve(config: &Config, store: Arc<dyn SwapStore>, listen: &str) -> Result<()> {
    let rate = config.maker_rate()?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(FixedRateOracle::new(rate));
    let policy = config.quote_policy();
    let engine = Engine::connect(config, store.clone()).await?;

    for (swap_id, swap) in store.list_incomplete()? {
        if let Swap::Alice(state) = swap {
            let ctx = engine.alice(swap_id, offline_channel(swap_id));
            tokio::spawn(settle(ctx, state));
        }
    }

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;
    info!(listen, %rate, "Serving swaps");

    loop {
        let (stream, addr) = listener.accept().await?;
        info!(%addr, "Taker connected");
        let (_router, mut incoming) = Router::spawn(TcpTransport::new(stream));
        let engine = engine.clone();
        let oracle = oracle.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            while let Some(new) = incoming.recv().await {
                match new.message {
                    Message::SwapRequest(_) if engine.store.load_latest(new.swap_id).is_ok() => {
                        warn!(swap_id = %new.swap_id, "Ignoring request for a recorded swap");
                    }
                    Message::SwapRequest(request) => {
                        let ctx = engine.alice(new.swap_id, new.channel);
                        tokio::spawn(sell(ctx, request.btc, oracle.clone(), policy.clone()));
                    }
                    other => warn!(
                        swap_id = %new.swap_id,
                        message = other.name(),
                        "Ignoring message for unknown swap"
                    ),
                }
            }
            info!(%addr, "Taker disconnected");
        });
    }
}

async fn sell(
    mut ctx: AliceContext,
    btc: Amount,
    oracle: Arc<dyn PriceOracle>,
    policy: QuotePolicy,
) {
    let swap_id = ctx.swap_id;
    info!(%swap_id, %btc, "Swap requested");
    match alice::negotiate(&mut ctx, btc, oracle.as_ref(), &policy).await {
        Ok(state) => settle(ctx, state).await,
        Err(e) => error!(%swap_id, error = %e, "Negotiation failed"),
    }
}

async fn settle(mut ctx: AliceContext, state: AliceState) {
    let swap_id = ctx.swap_id;
    match alice::run(&mut ctx, state).await {
        Ok(state) => info!(%swap_id, state = state.name(), "Swap finished"),
        Err(e) => error!(%swap_id, error = %e, "Swap stopped"),
    }
}
