//! Opaque resource quantity.
//!
//! [`Quantity`] carries a fixed-point amount of a resource (CPU for our
//! purposes) as `value × 10^scale`. The cache never does arithmetic on
//! quantities — it only stores, compares, and prints them, so that is
//! all this type supports.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed-point resource quantity: `value × 10^scale` base units.
///
/// `Quantity::millis(500)` is half a unit (500 millicores when the unit
/// is a core). Comparison normalizes across scales, so
/// `Quantity::millis(1000) == Quantity::new(1, 0)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quantity {
    /// Significand.
    pub value: i64,
    /// Decimal exponent applied to `value`.
    pub scale: i32,
}

impl Quantity {
    /// Create a quantity of `value × 10^scale` units.
    pub fn new(value: i64, scale: i32) -> Self {
        Self { value, scale }
    }

    /// Create a quantity of `value` milli-units (scale −3).
    pub fn millis(value: i64) -> Self {
        Self::new(value, -3)
    }

    /// Whether this quantity is zero.
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Significand scaled down to the smaller of the two scales.
    ///
    /// Exponent differences are capped at 38 (the i128 decimal range);
    /// anything larger saturates, which preserves ordering.
    fn aligned(&self, to_scale: i32) -> i128 {
        let diff = (self.scale - to_scale).unsigned_abs().min(38);
        let factor = 10i128.pow(diff);
        (self.value as i128).saturating_mul(factor)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.min(other.scale);
        self.aligned(scale).cmp(&other.aligned(scale))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value == 0 {
            return write!(f, "0");
        }
        if self.scale >= 0 {
            return write!(f, "{}{}", self.value, "0".repeat(self.scale as usize));
        }
        let places = self.scale.unsigned_abs() as usize;
        let sign = if self.value < 0 { "-" } else { "" };
        let digits = self.value.unsigned_abs().to_string();
        let (int_part, frac_part) = if digits.len() > places {
            let (i, f) = digits.split_at(digits.len() - places);
            (i.to_string(), f.to_string())
        } else {
            ("0".to_string(), format!("{}{}", "0".repeat(places - digits.len()), digits))
        };
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            write!(f, "{sign}{int_part}")
        } else {
            write!(f, "{sign}{int_part}.{frac_part}")
        }
    }
}
