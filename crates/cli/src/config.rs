//! TOML configuration for the `caravel` binary.
//!
//! ```toml
//! [bitcoin]
//! esplora_url = "http://127.0.0.1:3000"
//! network = "regtest"
//! key_file = "bitcoin.key"
//!
//! [monero]
//! wallet_rpc_url = "http://127.0.0.1:18083"
//! wallet_name = "caravel"
//! network = "stagenet"
//!
//! [data]
//! dir = "/var/lib/caravel"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bitcoin::Amount;
use caravel_bitcoin::{CancelTimelock, FeePolicy, PunishTimelock};
use caravel_monero::XmrAmount;
use protocol::{QuotePolicy, Rate, RetryConfig, SwapConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bitcoin: BitcoinConfig,
    pub monero: MoneroConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    pub data: DataConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitcoinConfig {
    pub esplora_url: String,
    pub network: bitcoin::Network,
    /// File holding the hex-encoded wallet secret key.
    pub key_file: PathBuf,
    #[serde(default = "default_bitcoin_finality")]
    pub finality: u32,
    #[serde(default)]
    pub fee: FeePolicy,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoneroConfig {
    pub wallet_rpc_url: String,
    pub wallet_name: String,
    pub network: String,
    #[serde(default = "default_monero_finality")]
    pub finality: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub cancel_timelock: u16,
    pub punish_timelock: u16,
    pub poll_interval_ms: u64,
    pub negotiation_timeout_secs: u64,
    pub lock_seen_timeout_secs: u64,
    pub retry: RetrySettings,
    pub quote: QuoteSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub attempt_timeout_secs: u64,
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

/// Maker pricing. `xmr_per_btc` is only required by `serve`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuoteSettings {
    pub xmr_per_btc: Option<String>,
    pub max_age_secs: u64,
    pub spread_bps: u32,
    pub min_buy_sat: u64,
    pub max_buy_sat: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub dir: PathBuf,
}

fn default_bitcoin_finality() -> u32 {
    1
}

fn default_monero_finality() -> u64 {
    10
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            cancel_timelock: 72,
            punish_timelock: 72,
            poll_interval_ms: 10_000,
            negotiation_timeout_secs: 60,
            lock_seen_timeout_secs: 3_600,
            retry: RetrySettings::default(),
            quote: QuoteSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            attempt_timeout_secs: retry.timeout.as_secs(),
            max_retries: retry.max_retries,
            base_delay_ms: millis(retry.base_delay),
            max_delay_ms: millis(retry.max_delay),
            jitter_ms: retry.jitter_ms,
        }
    }
}

impl Default for QuoteSettings {
    fn default() -> Self {
        let policy = QuotePolicy::default();
        Self {
            xmr_per_btc: None,
            max_age_secs: policy.max_age.as_secs(),
            spread_bps: policy.spread_bps,
            min_buy_sat: policy.min_buy.to_sat(),
            max_buy_sat: policy.max_buy.to_sat(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Reads and validates the file at `path`.
    ///
    /// # Errors
    /// Fails if the file cannot be read, is not valid TOML for this layout,
    /// or any value is out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Names the first offending field.
    pub fn validate(&self) -> Result<()> {
        validate_rpc_url("bitcoin.esplora_url", &self.bitcoin.esplora_url)?;
        validate_rpc_url("monero.wallet_rpc_url", &self.monero.wallet_rpc_url)?;
        validate_nonzero("bitcoin.finality", u64::from(self.bitcoin.finality))?;
        validate_nonzero("monero.finality", self.monero.finality)?;
        self.monero_network()?;
        if self.monero.wallet_name.trim().is_empty() {
            bail!("monero.wallet_name must not be empty");
        }

        let p = &self.protocol;
        validate_nonzero("protocol.cancel_timelock", u64::from(p.cancel_timelock))?;
        validate_nonzero("protocol.punish_timelock", u64::from(p.punish_timelock))?;
        validate_nonzero("protocol.poll_interval_ms", p.poll_interval_ms)?;
        validate_nonzero("protocol.negotiation_timeout_secs", p.negotiation_timeout_secs)?;
        validate_nonzero("protocol.lock_seen_timeout_secs", p.lock_seen_timeout_secs)?;
        validate_nonzero(
            "protocol.retry.attempt_timeout_secs",
            p.retry.attempt_timeout_secs,
        )?;
        validate_nonzero("protocol.quote.max_age_secs", p.quote.max_age_secs)?;
        if p.retry.base_delay_ms > p.retry.max_delay_ms {
            bail!("protocol.retry.base_delay_ms exceeds max_delay_ms");
        }
        if p.quote.min_buy_sat > p.quote.max_buy_sat {
            bail!("protocol.quote.min_buy_sat exceeds max_buy_sat");
        }
        if p.quote.spread_bps >= 10_000 {
            bail!("protocol.quote.spread_bps must be below 10000");
        }
        if let Some(rate) = &p.quote.xmr_per_btc {
            parse_rate(rate)?;
        }
        Ok(())
    }

    /// # Errors
    /// Fails on anything but mainnet, stagenet or testnet.
    pub fn monero_network(&self) -> Result<monero::Network> {
        match self.monero.network.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(monero::Network::Mainnet),
            "stagenet" => Ok(monero::Network::Stagenet),
            "testnet" => Ok(monero::Network::Testnet),
            other => bail!("monero.network: unknown network {other:?}"),
        }
    }

    /// # Errors
    /// Fails if the Monero network is unknown.
    pub fn swap_config(&self) -> Result<SwapConfig> {
        let p = &self.protocol;
        Ok(SwapConfig {
            bitcoin_network: self.bitcoin.network,
            monero_network: self.monero_network()?,
            cancel_timelock: CancelTimelock::new(p.cancel_timelock),
            punish_timelock: PunishTimelock::new(p.punish_timelock),
            fee: self.bitcoin.fee,
            bitcoin_finality: self.bitcoin.finality,
            monero_finality: self.monero.finality,
            poll_interval: Duration::from_millis(p.poll_interval_ms),
            negotiation_timeout: Duration::from_secs(p.negotiation_timeout_secs),
            lock_seen_timeout: Duration::from_secs(p.lock_seen_timeout_secs),
            retry: RetryConfig {
                timeout: Duration::from_secs(p.retry.attempt_timeout_secs),
                max_retries: p.retry.max_retries,
                base_delay: Duration::from_millis(p.retry.base_delay_ms),
                max_delay: Duration::from_millis(p.retry.max_delay_ms),
                jitter_ms: p.retry.jitter_ms,
            },
        })
    }

    #[must_use]
    pub fn quote_policy(&self) -> QuotePolicy {
        let q = &self.protocol.quote;
        QuotePolicy {
            max_age: Duration::from_secs(q.max_age_secs),
            spread_bps: q.spread_bps,
            min_buy: Amount::from_sat(q.min_buy_sat),
            max_buy: Amount::from_sat(q.max_buy_sat),
        }
    }

    /// The maker's fixed rate.
    ///
    /// # Errors
    /// Fails if `protocol.quote.xmr_per_btc` is unset or malformed.
    pub fn maker_rate(&self) -> Result<Rate> {
        let raw = self
            .protocol
            .quote
            .xmr_per_btc
            .as_deref()
            .context("protocol.quote.xmr_per_btc is required to serve quotes")?;
        parse_rate(raw)
    }

    /// Directory holding the swap journals.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.data.dir.join("swaps")
    }
}

fn parse_rate(raw: &str) -> Result<Rate> {
    let xmr = XmrAmount::from_xmr_str(raw)
        .with_context(|| format!("protocol.quote.xmr_per_btc: invalid amount {raw:?}"))?;
    if xmr == XmrAmount::ZERO {
        bail!("protocol.quote.xmr_per_btc must be positive");
    }
    Ok(Rate::new(xmr))
}

/// # Errors
/// Fails unless `url` is an http(s) URL with a host.
pub fn validate_rpc_url(field: &str, url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .with_context(|| format!("{field}: expected an http(s) URL, got {url:?}"))?;
    if rest.is_empty() || rest.starts_with('/') {
        bail!("{field}: URL has no host: {url:?}");
    }
    Ok(())
}

/// # Errors
/// Fails if `value` is zero.
pub fn validate_nonzero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        bail!("{field} must be greater than zero");
    }
    Ok(())
}
