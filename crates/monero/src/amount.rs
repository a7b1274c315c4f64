//! XMR amounts in piconero.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

const PICO_PER_XMR: u64 = 1_000_000_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XmrAmount(u64);

impl XmrAmount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_pico(pico: u64) -> Self {
        Self(pico)
    }

    #[must_use]
    pub const fn as_pico(self) -> u64 {
        self.0
    }

    /// Parses a decimal XMR string such as `"1.5"`.
    ///
    /// Returns `None` for malformed input, more than 12 decimals or overflow.
    #[must_use]
    pub fn from_xmr_str(s: &str) -> Option<Self> {
        let (whole, frac) = s.trim().split_once('.').unwrap_or((s.trim(), ""));
        if frac.len() > 12 || (whole.is_empty() && frac.is_empty()) {
            return None;
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let frac_pico: u64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<12}").parse().ok()?
        };
        whole
            .checked_mul(PICO_PER_XMR)?
            .checked_add(frac_pico)
            .map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl fmt::Display for XmrAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:012} XMR",
            self.0 / PICO_PER_XMR,
            self.0 % PICO_PER_XMR
        )
    }
}

impl Add for XmrAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for XmrAmount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl From<XmrAmount> for monero::Amount {
    fn from(amount: XmrAmount) -> Self {
        monero::Amount::from_pico(amount.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_strings() {
        assert_eq!(
            XmrAmount::from_xmr_str("1.5"),
            Some(XmrAmount::from_pico(1_500_000_000_000))
        );
        assert_eq!(XmrAmount::from_xmr_str("2"), Some(XmrAmount::from_pico(2 * PICO_PER_XMR)));
        assert_eq!(
            XmrAmount::from_xmr_str("0.000000000001"),
            Some(XmrAmount::from_pico(1))
        );
        assert_eq!(XmrAmount::from_xmr_str("0.0000000000001"), None);
        assert_eq!(XmrAmount::from_xmr_str("abc"), None);
        assert_eq!(XmrAmount::from_xmr_str("."), None);
    }

    #[test]
    fn displays_twelve_decimals() {
        assert_eq!(
            XmrAmount::from_pico(1_500_000_000_000).to_string(),
            "1.500000000000 XMR"
        );
    }

    #[test]
    fn converts_to_monero_amount() {
        let amount: monero::Amount = XmrAmount::from_pico(42).into();
        assert_eq!(amount.as_pico(), 42);
    }
}
