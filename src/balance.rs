//! Normalization of amounts as the backend sends them.
//!
//! Older wallets stored BeCoins multiplied by 100. The backend still returns a
//! mix of decimals, decimal strings and those scaled integers, and nothing in
//! the payload says which one a value is. [`AmountScale::LegacyHeuristic`]
//! guesses from the magnitude; [`AmountScale::Decimal`] trusts the backend to
//! send plain decimals.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Integer balances at or above this are treated as scaled by 100.
pub const BALANCE_SCALE_THRESHOLD: f64 = 10_000.0;
/// Integer transaction amounts at or above this are treated as scaled by 100.
pub const TRANSACTION_SCALE_THRESHOLD: f64 = 1_000.0;

/// A numeric value exactly as it arrived from the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BackendAmount {
    Number(f64),
    Text(String),
}

impl Default for BackendAmount {
    fn default() -> Self {
        BackendAmount::Number(0.0)
    }
}

impl<'de> Deserialize<'de> for BackendAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => BackendAmount::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => BackendAmount::Text(s),
            // null, bools and objects are coerced to zero
            _ => BackendAmount::Number(0.0),
        })
    }
}

impl From<f64> for BackendAmount {
    fn from(value: f64) -> Self {
        BackendAmount::Number(value)
    }
}

impl From<i64> for BackendAmount {
    fn from(value: i64) -> Self {
        BackendAmount::Number(value as f64)
    }
}

impl From<i32> for BackendAmount {
    fn from(value: i32) -> Self {
        BackendAmount::Number(f64::from(value))
    }
}

impl From<u64> for BackendAmount {
    fn from(value: u64) -> Self {
        BackendAmount::Number(value as f64)
    }
}

impl From<&str> for BackendAmount {
    fn from(value: &str) -> Self {
        BackendAmount::Text(value.to_string())
    }
}

impl From<String> for BackendAmount {
    fn from(value: String) -> Self {
        BackendAmount::Text(value)
    }
}

impl BackendAmount {
    /// The value with no scaling applied. Unparseable or non-finite input is 0.
    pub fn raw(&self) -> f64 {
        let value = match self {
            BackendAmount::Number(n) => *n,
            BackendAmount::Text(s) => parse_leading_number(s),
        };
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}

/// Reads the longest numeric prefix, so `"12.5 BEC"` is 12.5. No digits means 0.
fn parse_leading_number(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_end = digits_from(end);
    let mut seen_digits = int_end > end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        if frac_end > end + 1 || seen_digits {
            seen_digits |= frac_end > end + 1;
            end = frac_end;
        }
    }
    if !seen_digits {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    text[..end].parse::<f64>().unwrap_or(0.0)
}

/// How numeric amounts from the backend are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AmountScale {
    /// Strings are trusted verbatim; integers at or above a threshold are divided by 100.
    #[default]
    LegacyHeuristic,
    /// Every value is already a decimal BeCoin amount.
    Decimal,
}

impl AmountScale {
    pub fn normalize(self, amount: &BackendAmount, threshold: f64) -> f64 {
        match (self, amount) {
            (AmountScale::LegacyHeuristic, BackendAmount::Number(n))
                if n.is_finite() && n.fract() == 0.0 && *n >= threshold =>
            {
                n / 100.0
            }
            _ => amount.raw(),
        }
    }

    pub fn balance(self, amount: &BackendAmount) -> f64 {
        self.normalize(amount, BALANCE_SCALE_THRESHOLD)
    }

    pub fn transaction_amount(self, amount: &BackendAmount) -> f64 {
        self.normalize(amount, TRANSACTION_SCALE_THRESHOLD)
    }
}

/// Legacy balance conversion: `"0.0010"` stays `0.001`, `250000` becomes `2500`.
pub fn convert_backend_balance(amount: impl Into<BackendAmount>) -> f64 {
    AmountScale::LegacyHeuristic.balance(&amount.into())
}

/// Legacy transaction amount conversion, with the lower 1,000 threshold.
pub fn convert_transaction_amount(amount: impl Into<BackendAmount>) -> f64 {
    AmountScale::LegacyHeuristic.transaction_amount(&amount.into())
}

/// Serde helper for numeric fields that may arrive as numbers, strings or garbage.
pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(BackendAmount::deserialize(deserializer)?.raw())
}

/// Like [`lenient_f64`] for counts; negatives and fractions clamp down.
pub(crate) fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = BackendAmount::deserialize(deserializer)?.raw();
    Ok(value.max(0.0).min(f64::from(u32::MAX)) as u32)
}
