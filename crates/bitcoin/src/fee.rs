//! Fixed fee policy for the pre-signed swap transactions.
//!
//! Every party must rebuild bit-identical transactions from the agreed
//! parameters, so fees are a pure function of the policy and the transaction
//! weight.

use bitcoin::{Amount, Script, Weight};
use serde::{Deserialize, Serialize};

use crate::{BitcoinError, Result};

/// Fee settings agreed during negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub sat_per_vbyte: u64,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_relay_fee: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub max_fee: Amount,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            sat_per_vbyte: 2,
            min_relay_fee: Amount::from_sat(300),
            max_fee: Amount::from_sat(100_000),
        }
    }
}

impl FeePolicy {
    /// fee = max(vsize * rate, min_relay_fee), capped by `max_fee`.
    ///
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the fee exceeds `max_fee`.
    pub fn fee_for_weight(&self, weight: Weight) -> Result<Amount> {
        let vsize = weight.to_vbytes_ceil();
        let fee = Amount::from_sat(vsize.saturating_mul(self.sat_per_vbyte))
            .max(self.min_relay_fee);
        if fee > self.max_fee {
            return Err(BitcoinError::InsufficientFunds {
                needed: fee,
                available: self.max_fee,
            });
        }
        Ok(fee)
    }

    /// Value left for a single output paying to `destination` after fees.
    ///
    /// # Errors
    /// Returns `BitcoinError::InsufficientFunds` if the fee is above policy or
    /// the remaining value would be dust.
    pub fn output_value(
        &self,
        input: Amount,
        weight: Weight,
        destination: &Script,
    ) -> Result<Amount> {
        let fee = self.fee_for_weight(weight)?;
        let dust = destination.minimal_non_dust();
        match input.checked_sub(fee) {
            Some(value) if value >= dust => Ok(value),
            _ => Err(BitcoinError::InsufficientFunds {
                needed: fee + dust,
                available: input,
            }),
        }
    }
}
