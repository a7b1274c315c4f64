//! Price quotes for the maker.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bitcoin::Amount;
use caravel_monero::XmrAmount;
use tracing::debug;

use crate::error::SwapError;
use crate::types::Rate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quote {
    pub rate: Rate,
    pub fetched_at: SystemTime,
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest BTC/XMR rate.
    async fn quote(&self) -> Result<Quote, SwapError>;
}

/// Oracle returning one configured rate, timestamped on each call.
#[derive(Clone, Copy, Debug)]
pub struct FixedRateOracle {
    rate: Rate,
}

impl FixedRateOracle {
    #[must_use]
    pub fn new(rate: Rate) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl PriceOracle for FixedRateOracle {
    async fn quote(&self) -> Result<Quote, SwapError> {
        Ok(Quote {
            rate: self.rate,
            fetched_at: SystemTime::now(),
        })
    }
}

/// Maker's rules for turning a quote into an offer.
#[derive(Clone, Debug)]
pub struct QuotePolicy {
    /// Quotes older than this are refused.
    pub max_age: Duration,
    /// Basis points taken off the market rate.
    pub spread_bps: u32,
    pub min_buy: Amount,
    pub max_buy: Amount,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
            spread_bps: 0,
            min_buy: Amount::from_sat(10_000),
            max_buy: Amount::from_sat(100_000_000),
        }
    }
}

impl QuotePolicy {
    /// Prices `btc` against `quote` as of `now`.
    ///
    /// # Errors
    /// Returns `SwapError::Quote` if the quote is stale, dated in the
    /// future, or the amount is outside the configured limits.
    pub fn price(
        &self,
        quote: &Quote,
        btc: Amount,
        now: SystemTime,
    ) -> Result<(Rate, XmrAmount), SwapError> {
        let age = now
            .duration_since(quote.fetched_at)
            .map_err(|_| SwapError::Quote("quote is dated in the future".into()))?;
        if age > self.max_age {
            return Err(SwapError::Quote(format!(
                "quote is {}s old, limit is {}s",
                age.as_secs(),
                self.max_age.as_secs()
            )));
        }
        if btc < self.min_buy || btc > self.max_buy {
            return Err(SwapError::Quote(format!(
                "{btc} outside limits {} to {}",
                self.min_buy, self.max_buy
            )));
        }

        let rate = quote.rate.with_spread(self.spread_bps);
        let xmr = rate
            .xmr_for(btc)
            .ok_or_else(|| SwapError::Quote("amount overflows".into()))?;
        if xmr == XmrAmount::ZERO {
            return Err(SwapError::Quote(format!("{btc} buys no XMR")));
        }
        debug!(%btc, %xmr, %rate, "Priced swap");
        Ok((rate, xmr))
    }
}
