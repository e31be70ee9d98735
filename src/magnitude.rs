//! Exact two-part counters used to track occupancy and requested space.
//!
//! A [Magnitude] holds `high * ONE_GIG + low`, which keeps byte counts in the
//! exabyte range exact without relying on a single native register.

use std::{
    fmt::{self, Display},
    ops::{AddAssign, SubAssign},
};

/// The base of the high part.
pub const ONE_GIG: i64 = 1_000_000_000;

/// Errors that can be returned by this module's methods.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnitudeError {
    #[error("division by zero")]
    DivisionByZero,
}

/// An exact nonnegative counter, or an invalid one after an underflow.
///
/// After any completed operation `0 <= low < ONE_GIG`.
/// A negative `high` marks the result of a reduction below zero:
/// such a value must be checked with [Magnitude::is_valid] before being trusted.
///
/// Ordering compares `high` first, so every invalid magnitude sorts below zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Magnitude {
    high: i64,
    low: i64,
}

impl Magnitude {
    pub const ZERO: Self = Self { high: 0, low: 0 };

    /// Loads a magnitude from a signed integer.
    ///
    /// The sign is discarded: `Magnitude::new(-5) == Magnitude::new(5)`.
    pub const fn new(value: i64) -> Self {
        let value = value.unsigned_abs();
        Self {
            high: (value / ONE_GIG as u64) as i64,
            low: (value % ONE_GIG as u64) as i64,
        }
    }

    /// Builds a magnitude from its parts, carrying any excess of `low` into `high`.
    pub const fn from_parts(high: i64, low: i64) -> Self {
        Self {
            high: high + low.div_euclid(ONE_GIG),
            low: low.rem_euclid(ONE_GIG),
        }
    }

    pub const fn high(&self) -> i64 {
        self.high
    }

    pub const fn low(&self) -> i64 {
        self.low
    }

    /// Whether the magnitude survived every reduction applied to it.
    pub const fn is_valid(&self) -> bool {
        self.high >= 0
    }

    /// The exact value, if valid.
    pub const fn get(&self) -> Option<u128> {
        if self.is_valid() {
            Some(self.high as u128 * ONE_GIG as u128 + self.low as u128)
        } else {
            None
        }
    }

    /// The value clamped to zero when invalid.
    pub const fn or_zero(self) -> Self {
        if self.is_valid() {
            self
        } else {
            Self::ZERO
        }
    }

    /// Adds the absolute value of `amount`.
    pub fn increase(&mut self, amount: i64) {
        let amount = amount.unsigned_abs();
        self.high += (amount / ONE_GIG as u64) as i64;
        self.low += (amount % ONE_GIG as u64) as i64;
        if self.low >= ONE_GIG {
            self.high += 1;
            self.low -= ONE_GIG;
        }
    }

    /// Subtracts the absolute value of `amount`, borrowing from `high` as needed.
    ///
    /// `high` goes negative when the result would be below zero.
    pub fn reduce(&mut self, amount: i64) {
        let amount = amount.unsigned_abs();
        self.high -= (amount / ONE_GIG as u64) as i64;
        let rest = (amount % ONE_GIG as u64) as i64;
        if rest > self.low {
            self.low += ONE_GIG;
            self.high -= 1;
        }
        self.low -= rest;
    }

    /// Multiplies by the absolute value of `factor`.
    ///
    /// The product goes through an `f64` and loses precision for very large values.
    pub fn multiply(&mut self, factor: i64) {
        let product = self.as_f64() * factor.unsigned_abs() as f64;
        self.load_f64(product);
    }

    /// Divides by the absolute value of `divisor`.
    ///
    /// The quotient goes through an `f64` and loses precision for very large values.
    pub fn divide(&mut self, divisor: i64) -> Result<(), MagnitudeError> {
        if divisor == 0 {
            return Err(MagnitudeError::DivisionByZero);
        }
        let quotient = self.as_f64() / divisor.unsigned_abs() as f64;
        self.load_f64(quotient);
        Ok(())
    }

    /// Halves the value exactly, rounding down.
    pub fn halve(&mut self) {
        let rest = self.high.rem_euclid(2) * ONE_GIG + self.low;
        *self = Self::from_parts(self.high.div_euclid(2), rest / 2);
    }

    fn as_f64(&self) -> f64 {
        self.high as f64 * ONE_GIG as f64 + self.low as f64
    }

    fn load_f64(&mut self, value: f64) {
        let high = (value / ONE_GIG as f64) as i64;
        let low = (value - high as f64 * ONE_GIG as f64) as i64;
        *self = Self::from_parts(high, low);
    }
}

impl From<i64> for Magnitude {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<u64> for Magnitude {
    fn from(value: u64) -> Self {
        Self {
            high: (value / ONE_GIG as u64) as i64,
            low: (value % ONE_GIG as u64) as i64,
        }
    }
}

impl AddAssign<&Magnitude> for Magnitude {
    fn add_assign(&mut self, increment: &Magnitude) {
        self.increase(increment.low);
        self.high += increment.high;
    }
}

impl AddAssign for Magnitude {
    fn add_assign(&mut self, increment: Magnitude) {
        *self += &increment;
    }
}

impl SubAssign<&Magnitude> for Magnitude {
    fn sub_assign(&mut self, decrement: &Magnitude) {
        self.reduce(decrement.low);
        self.high -= decrement.high;
    }
}

impl SubAssign for Magnitude {
    fn sub_assign(&mut self, decrement: Magnitude) {
        *self -= &decrement;
    }
}

impl Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "invalid({}, {})", self.high, self.low),
        }
    }
}
