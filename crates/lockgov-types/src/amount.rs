use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// 96-bit unsigned token amount.
///
/// Backed by a `u128` whose upper 32 bits are always zero. Every arithmetic
/// operation is checked against the 96-bit capacity: there is no wrapping and
/// no saturating operator overload, callers decide how to surface overflow.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    /// Width of the amount in bits.
    pub const BITS: u32 = 96;
    /// Width of the big-endian encoding in bytes.
    pub const BYTES: usize = 12;

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);
    pub const MAX: Self = Self((1u128 << Self::BITS) - 1);

    /// Create from a raw `u128`, `None` if it does not fit in 96 bits.
    pub const fn new(value: u128) -> Option<Self> {
        if value > Self::MAX.0 {
            None
        } else {
            Some(Self(value))
        }
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value as u128)
    }

    /// Raw value.
    pub const fn get(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        self.0.checked_add(rhs.0).and_then(Self::new)
    }

    /// Checked subtraction
    pub fn checked_sub(&self, rhs: &Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Addition that reports overflow as a typed error.
    pub fn try_add(&self, rhs: &Self) -> Result<Self, TypesError> {
        self.checked_add(rhs).ok_or(TypesError::AmountOverflow)
    }

    /// Subtraction that reports underflow as a typed error.
    pub fn try_sub(&self, rhs: &Self) -> Result<Self, TypesError> {
        self.checked_sub(rhs).ok_or(TypesError::AmountUnderflow)
    }

    /// Multiply by a basis-point factor (10_000 = 1x), flooring.
    ///
    /// The result is a `u128` since it is a weight, not an amount: a 96-bit
    /// amount times any `u32` factor always fits.
    pub fn mul_bps(&self, bps: u32) -> u128 {
        self.0 * bps as u128 / 10_000
    }

    /// Convert to big-endian bytes (12 bytes)
    pub fn to_be_bytes(&self) -> [u8; Self::BYTES] {
        let full = self.0.to_be_bytes();
        let mut bytes = [0u8; Self::BYTES];
        bytes.copy_from_slice(&full[16 - Self::BYTES..]);
        bytes
    }

    /// Convert from big-endian bytes (12 bytes)
    pub fn from_be_bytes(bytes: [u8; Self::BYTES]) -> Self {
        let mut full = [0u8; 16];
        full[16 - Self::BYTES..].copy_from_slice(&bytes);
        Self(u128::from_be_bytes(full))
    }

    /// Parse from decimal string
    pub fn from_decimal_str(s: &str) -> Result<Self, TypesError> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(TypesError::InvalidAmountString(s.to_string()));
        }
        let value: u128 = s.parse().map_err(|_| TypesError::AmountOverflow)?;
        Self::new(value).ok_or(TypesError::AmountOverflow)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<u32> for Amount {
    fn from(value: u32) -> Self {
        Self(value as u128)
    }
}

impl TryFrom<u128> for Amount {
    type Error = TypesError;

    fn try_from(value: u128) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(TypesError::AmountOverflow)
    }
}

impl From<Amount> for u128 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl fmt::LowerHex for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl FromStr for Amount {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(stripped) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let bytes = hex::decode(stripped)?;
            if bytes.len() > Self::BYTES {
                return Err(TypesError::AmountOverflow);
            }
            let mut padded = [0u8; Self::BYTES];
            padded[Self::BYTES - bytes.len()..].copy_from_slice(&bytes);
            Ok(Self::from_be_bytes(padded))
        } else {
            Self::from_decimal_str(s)
        }
    }
}

impl std::iter::Sum<Amount> for Option<Amount> {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Some(Amount::ZERO), |acc, x| acc?.checked_add(&x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_amount_bounds() {
        assert_eq!(Amount::MAX.get(), (1u128 << 96) - 1);
        assert!(Amount::new(1u128 << 96).is_none());
        assert_eq!(Amount::new(5), Some(Amount::from_u64(5)));
    }

    #[test]
    fn test_amount_add_overflow() {
        let almost = Amount::new(Amount::MAX.get() - 1).unwrap();
        assert_eq!(almost.checked_add(&Amount::ONE), Some(Amount::MAX));
        assert!(almost.checked_add(&Amount::from_u64(2)).is_none());
        assert_eq!(
            almost.try_add(&Amount::from_u64(2)),
            Err(TypesError::AmountOverflow)
        );
    }

    #[test]
    fn test_amount_sub_underflow() {
        let a = Amount::from_u64(100);
        let b = Amount::from_u64(200);
        assert_eq!(b.checked_sub(&a), Some(a));
        assert!(a.checked_sub(&b).is_none());
        assert_eq!(a.try_sub(&b), Err(TypesError::AmountUnderflow));
    }

    #[test]
    fn test_amount_mul_bps() {
        assert_eq!(Amount::from_u64(10_000).mul_bps(30_000), 30_000);
        assert_eq!(Amount::from_u64(3).mul_bps(15_000), 4);
        // Capacity: MAX * u32::MAX still fits in u128
        let _ = Amount::MAX.mul_bps(u32::MAX);
    }

    #[test]
    fn test_amount_be_encoding() {
        let amount = Amount::from_u64(0x0102_0304);
        assert_eq!(
            amount.to_be_bytes(),
            [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4]
        );
        assert_eq!(Amount::from_be_bytes(Amount::MAX.to_be_bytes()), Amount::MAX);
    }

    #[test]
    fn test_amount_from_str() {
        assert_eq!(Amount::from_str("12345").unwrap(), Amount::from_u64(12345));
        assert_eq!(Amount::from_str("0xff").unwrap(), Amount::from_u64(255));
        assert!(Amount::from_str("").is_err());
        assert!(Amount::from_str("-1").is_err());
        assert!(Amount::from_str("79228162514264337593543950336").is_err()); // 2^96
        assert_eq!(
            Amount::from_str("79228162514264337593543950335").unwrap(),
            Amount::MAX
        );
    }

    #[test]
    fn test_amount_sum() {
        let total: Option<Amount> = [1u64, 2, 3].into_iter().map(Amount::from).sum();
        assert_eq!(total, Some(Amount::from_u64(6)));

        let overflow: Option<Amount> = [Amount::MAX, Amount::ONE].into_iter().sum();
        assert!(overflow.is_none());
    }

    proptest! {
        #[test]
        fn prop_checked_add_never_exceeds_max(a in 0u128..=Amount::MAX.get(), b in 0u128..=Amount::MAX.get()) {
            let a = Amount::new(a).unwrap();
            let b = Amount::new(b).unwrap();
            match a.checked_add(&b) {
                Some(sum) => prop_assert!(sum <= Amount::MAX),
                None => prop_assert!(a.get() + b.get() > Amount::MAX.get()),
            }
        }
    }
}
