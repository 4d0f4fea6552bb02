use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

pub const DOIN_DECIMALS: u32 = 8;
pub const DOIN_BASE_UNIT: u64 = 100_000_000; // 10^8

/// An amount of DOIN in integer base units (10^8 base units = 1 DOIN).
///
/// Keeping amounts integral makes the 65/30/5 reward split and the supply
/// cap exact; fractional DOIN only appears at display boundaries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DoinAmount(u64);

impl DoinAmount {
    pub const ZERO: Self = Self(0);
    pub const MAX_SUPPLY: Self = Self(21_000_000 * DOIN_BASE_UNIT);

    pub fn from_doin(doin: f64) -> Self {
        Self((doin * DOIN_BASE_UNIT as f64) as u64)
    }

    pub const fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub fn to_doin(&self) -> f64 {
        self.0 as f64 / DOIN_BASE_UNIT as f64
    }

    pub const fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Sum for DoinAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc.saturating_add(x))
    }
}

impl fmt::Display for DoinAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8} DOIN", self.to_doin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let amount = DoinAmount::from_doin(50.0);
        assert_eq!(amount.to_base_units(), 50 * DOIN_BASE_UNIT);
        assert_eq!(amount.to_doin(), 50.0);
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = DoinAmount::from_base_units(10);
        let b = DoinAmount::from_base_units(3);
        assert_eq!(a.checked_sub(b), Some(DoinAmount::from_base_units(7)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(
            DoinAmount::from_base_units(u64::MAX).checked_add(DoinAmount::from_base_units(1)),
            None
        );
    }

    #[test]
    fn test_sum() {
        let total: DoinAmount = vec![
            DoinAmount::from_base_units(1),
            DoinAmount::from_base_units(2),
            DoinAmount::from_base_units(3),
        ]
        .into_iter()
        .sum();
        assert_eq!(total, DoinAmount::from_base_units(6));
    }
}
