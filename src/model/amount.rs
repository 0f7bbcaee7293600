//! Fixed-point money type.
//!
//! Bonus points are stored as whole kopecks (two fractional digits). The only
//! place a floating-point number appears is the calculator's JSON payload, and
//! that value is parsed through its string form so `201.01` stays `201.01`.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KOPECKS_PER_ROUBLE: i64 = 100;

/// A monetary amount with exactly two fractional digits, stored as total
/// kopecks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    kopecks: i64,
}

/// Error parsing an [`Amount`] from its decimal string form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountParseError {
    /// The string is not `R` or `R.KK`.
    #[error("malformed amount: {0:?}")]
    Malformed(String),

    /// More than two fractional digits.
    #[error("too many fractional digits: {0:?}")]
    Precision(String),
}

impl Amount {
    /// Builds an amount from roubles and kopecks, normalizing kopeck
    /// overflow (`1 roubles, 150 kopecks` becomes `2.50`).
    pub fn new(roubles: i64, kopecks: i64) -> Self {
        Amount {
            kopecks: roubles * KOPECKS_PER_ROUBLE + kopecks,
        }
    }

    /// Builds an amount from a raw kopeck count.
    pub fn from_kopecks(kopecks: i64) -> Self {
        Amount { kopecks }
    }

    /// Total value in kopecks.
    pub fn total_kopecks(&self) -> i64 {
        self.kopecks
    }

    /// True when the amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.kopecks == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roubles = self.kopecks / KOPECKS_PER_ROUBLE;
        let kopecks = self.kopecks % KOPECKS_PER_ROUBLE;
        if kopecks == 0 {
            write!(f, "{roubles}")
        } else {
            write!(f, "{}.{:02}", roubles, kopecks.abs())
        }
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AmountParseError::Malformed(s.to_string());

        let mut parts = s.splitn(3, '.');
        let roubles_part = parts.next().ok_or_else(malformed)?;
        let kopecks_part = parts.next();
        if parts.next().is_some() {
            return Err(malformed());
        }

        let roubles: i64 = roubles_part.parse().map_err(|_| malformed())?;
        let negative = roubles_part.trim_start().starts_with('-');

        let kopecks = match kopecks_part {
            None | Some("") => 0,
            Some(frac) => {
                if frac.len() > 2 {
                    return Err(AmountParseError::Precision(s.to_string()));
                }
                let digits: i64 = frac.parse().map_err(|_| malformed())?;
                if digits < 0 {
                    // "1.-5" parses as i64 but is not a decimal fraction
                    return Err(malformed());
                }
                // "10.1" means 10 roubles 10 kopecks
                if frac.len() == 1 {
                    digits * 10
                } else {
                    digits
                }
            }
        };

        let kopecks = if negative { -kopecks } else { kopecks };
        Ok(Amount::new(roubles, kopecks))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Two-digit decimals round-trip exactly through f64's shortest
        // representation, which is what ends up on the wire.
        let value = self.kopecks as f64 / KOPECKS_PER_ROUBLE as f64;
        serializer.serialize_f64(value)
    }
}

struct AmountVisitor;

impl Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a decimal number with at most two fractional digits")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Ok(Amount::new(v, 0))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Ok(Amount::new(v as i64, 0))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        // f64 Display yields the shortest round-trip form, so "201.01"
        // comes back out exactly as it went over the wire.
        format!("{v}").parse().map_err(de::Error::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}
