//! Exact resource quantities.
//!
//! Quantities are stored as a signed count of milli-units so that `"100m"`,
//! `"1.5"` and `"2Gi"` all compare and add exactly. Parsing accepts the usual
//! decimal (`k`, `M`, `G`, `T`, `P`, `E`) and binary (`Ki` .. `Ei`) suffixes
//! plus `m` for milli. Fractions finer than one milli round up. Parsed values
//! are capped at [`Quantity::MAX`], the signed 64-bit milli range, and sums
//! saturate instead of overflowing.
//!
//! Admission decisions must only ever use the integer comparisons here. The
//! floating-point helper at the bottom exists for observability.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

const MILLI: i128 = 1_000;
const KIBI: i128 = 1_024;

// Binary suffixes tried by `Display`, largest first. Only Mi and above so
// that small counts such as cpu "2048" stay readable.
const DISPLAY_BINARY: [(&str, i128); 5] = [
    ("Ei", KIBI * KIBI * KIBI * KIBI * KIBI * KIBI),
    ("Pi", KIBI * KIBI * KIBI * KIBI * KIBI),
    ("Ti", KIBI * KIBI * KIBI * KIBI),
    ("Gi", KIBI * KIBI * KIBI),
    ("Mi", KIBI * KIBI),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i128);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);
    /// Largest quantity `parse` accepts: `i64::MAX` milli-units.
    pub const MAX: Quantity = Quantity(i64::MAX as i128);

    pub const fn from_milli(milli: i128) -> Self {
        Self(milli)
    }

    pub const fn from_units(units: i64) -> Self {
        Self(units as i128 * MILLI)
    }

    pub const fn milli(self) -> i128 {
        self.0
    }

    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(Error::quantity(input, "empty quantity"));
        }
        let s = s.strip_prefix('+').unwrap_or(s);
        if s.starts_with('-') {
            return Err(Error::quantity(input, "negative quantities are not allowed"));
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);

        let (whole, frac) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(Error::quantity(input, "missing numeric value"));
        }
        if frac.contains('.') {
            return Err(Error::quantity(input, "more than one decimal point"));
        }
        if whole.len() + frac.len() > 30 {
            return Err(Error::quantity(input, "too many digits"));
        }

        let multiplier = suffix_multiplier(suffix)
            .ok_or_else(|| Error::quantity(input, format!("unknown suffix '{suffix}'")))?;

        let digits = format!("{whole}{frac}");
        let mantissa: i128 = digits
            .parse()
            .map_err(|e| Error::quantity(input, format!("{e}")))?;
        let scale = 10i128.pow(frac.len() as u32);

        let scaled = mantissa
            .checked_mul(multiplier)
            .ok_or_else(|| Error::quantity(input, "quantity too large"))?;
        // Round up anything below milli precision.
        let milli = scaled
            .checked_add(scale - 1)
            .map(|v| v / scale)
            .filter(|&v| v <= Self::MAX.0)
            .ok_or_else(|| Error::quantity(input, "quantity too large"))?;
        Ok(Self(milli))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Clamp negative values to zero.
    pub fn clamp_zero(self) -> Self {
        Self(self.0.max(0))
    }

    pub fn saturating_sub(self, other: Quantity) -> Self {
        Self(self.0.saturating_sub(other.0)).clamp_zero()
    }

    /// Go-style three-way compare, kept for readability at admission sites
    /// (`available.cmp_quantity(requested).is_lt()` rejects).
    pub fn cmp_quantity(self, other: Quantity) -> Ordering {
        self.0.cmp(&other.0)
    }
}

fn suffix_multiplier(suffix: &str) -> Option<i128> {
    let m = match suffix {
        "m" => 1,
        "" => MILLI,
        "k" => MILLI * 1_000,
        "M" => MILLI * 1_000_000,
        "G" => MILLI * 1_000_000_000,
        "T" => MILLI * 1_000_000_000_000,
        "P" => MILLI * 1_000_000_000_000_000,
        "E" => MILLI * 1_000_000_000_000_000_000,
        "Ki" => MILLI * KIBI,
        "Mi" => MILLI * KIBI.pow(2),
        "Gi" => MILLI * KIBI.pow(3),
        "Ti" => MILLI * KIBI.pow(4),
        "Pi" => MILLI * KIBI.pow(5),
        "Ei" => MILLI * KIBI.pow(6),
        _ => return None,
    };
    Some(m)
}

/// Exhaustion percentage `((requesting - available) / available) * 100`.
///
/// Returns `None` when nothing is available (the ratio is undefined).
pub fn exhaustion_percent(requesting: Quantity, available: Quantity) -> Option<f64> {
    if !available.is_positive() {
        return None;
    }
    let deficit = requesting.0.saturating_sub(available.0) as f64;
    Some(deficit / available.0 as f64 * 100.0)
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % MILLI != 0 {
            return write!(f, "{}m", self.0);
        }
        let units = self.0 / MILLI;
        if units != 0 {
            for (suffix, factor) in DISPLAY_BINARY {
                if units % factor == 0 {
                    return write!(f, "{}{}", units / factor, suffix);
                }
            }
        }
        write!(f, "{units}")
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Quantity::parse(s)
    }
}

impl Add for Quantity {
    type Output = Quantity;
    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Quantity {
    type Output = Quantity;
    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a quantity string such as \"100m\" or \"2Gi\", or an integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
        Quantity::parse(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
        let q = Quantity(v as i128 * MILLI);
        if q > Quantity::MAX {
            return Err(E::custom("quantity too large"));
        }
        Ok(q)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
        if v < 0 {
            return Err(E::custom("negative quantities are not allowed"));
        }
        let q = Quantity(v as i128 * MILLI);
        if q > Quantity::MAX {
            return Err(E::custom("quantity too large"));
        }
        Ok(q)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Quantity, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}
