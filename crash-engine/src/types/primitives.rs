//! Validated primitive types for domain entities.
//!
//! These newtypes provide:
//! - Type safety (can't accidentally pass an amount where an address belongs)
//! - Validation at construction time
//! - Domain semantics in function signatures

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ETHEREUM ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated 20-byte Ethereum address.
///
/// This newtype ensures addresses are always exactly 20 bytes. Use `Address`
/// from `alloy-primitives` for on-chain interaction, but this type for
/// persistence, ledger keys, and domain logic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EthAddress([u8; 20]);

impl EthAddress {
    /// Create from a fixed-size array (infallible).
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidAddress::WrongLength` if the slice is not exactly 20 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidAddress> {
        let bytes: [u8; 20] = slice
            .try_into()
            .map_err(|_| InvalidAddress::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from hex string (with or without 0x prefix).
    ///
    /// # Errors
    /// Returns `InvalidAddress` if the string is not valid hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidAddress> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 40 {
            return Err(InvalidAddress::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidAddress::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Get as a byte slice.
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Convert to lowercase hex string with 0x prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Check if this is the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// The zero address (0x0000...0000).
    pub const ZERO: Self = Self([0u8; 20]);
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress({})", self.to_hex())
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<EthAddress> for String {
    fn from(addr: EthAddress) -> Self {
        addr.to_hex()
    }
}

impl TryFrom<String> for EthAddress {
    type Error = InvalidAddress;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl TryFrom<&str> for EthAddress {
    type Error = InvalidAddress;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_hex(s)
    }
}

impl From<[u8; 20]> for EthAddress {
    fn from(bytes: [u8; 20]) -> Self {
        Self::new(bytes)
    }
}

impl From<Address> for EthAddress {
    fn from(addr: Address) -> Self {
        Self::new(addr.0.0)
    }
}

impl From<EthAddress> for Address {
    fn from(addr: EthAddress) -> Self {
        Self::from(addr.0)
    }
}

/// Error for invalid Ethereum addresses.
#[derive(Debug, Clone, Error)]
pub enum InvalidAddress {
    /// Address has wrong byte length.
    #[error("wrong length: expected 20 bytes, got {0}")]
    WrongLength(usize),
    /// Address contains invalid hex characters.
    #[error("invalid hex encoding")]
    InvalidHex,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEI (integer token amount — the ledger never touches floating point)
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-negative amount denominated in wei, backed by `U256`.
///
/// The ledger core performs all arithmetic in this type. Unlike a
/// `BigDecimal`-backed amount, `Wei` has no fractional component and no
/// rounding behavior to reason about — every `LedgerEntry` and every
/// `Account` balance is exact.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wei(U256);

impl Wei {
    /// Zero wei.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Construct from a `U256`.
    #[must_use]
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    /// Construct from a `u128` (convenience for constants/tests).
    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        Self(U256::from(value))
    }

    /// Parse a base-10 string into wei.
    ///
    /// # Errors
    /// Returns `InvalidAmount::ParseError` if the string isn't a valid
    /// non-negative base-10 integer.
    pub fn parse(s: &str) -> Result<Self, InvalidAmount> {
        U256::from_str(s)
            .map(Self)
            .map_err(|_| InvalidAmount::ParseError)
    }

    /// Get the underlying `U256`.
    #[must_use]
    pub const fn as_u256(&self) -> U256 {
        self.0
    }

    /// Whether this amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition; `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction; `None` if `other > self`.
    #[must_use]
    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Saturating addition.
    #[must_use]
    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction (floors at zero).
    #[must_use]
    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Scale by a parts-per-million multiplier, rounding down.
    ///
    /// Used to compute a bet's potential payout (`stake * target_ppm /
    /// 1_000_000`) without ever going through a floating-point
    /// representation.
    #[must_use]
    pub fn scale_ppm(&self, ppm: u64) -> Self {
        let scaled = self.0.saturating_mul(U256::from(ppm)) / U256::from(Ppm::UNIT);
        Self(scaled)
    }

    /// Construct from a SQL `NUMERIC` value, read back as its decimal
    /// string. `U256` has no native `BigDecimal` conversion, so the round
    /// trip goes through the base-10 representation; ledger amounts are
    /// always stored as whole wei, so this never loses precision.
    #[must_use]
    pub fn from_bigdecimal(value: &sqlx::types::BigDecimal) -> Self {
        Self::parse(&value.to_string()).unwrap_or(Self::ZERO)
    }

    /// Convert to a SQL `NUMERIC` value via the decimal string.
    #[must_use]
    pub fn to_bigdecimal(&self) -> sqlx::types::BigDecimal {
        use std::str::FromStr as _;
        sqlx::types::BigDecimal::from_str(&self.0.to_string()).unwrap_or_default()
    }
}

impl fmt::Debug for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wei({})", self.0)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Wei> for String {
    fn from(amount: Wei) -> Self {
        amount.0.to_string()
    }
}

impl TryFrom<String> for Wei {
    type Error = InvalidAmount;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl Default for Wei {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<Wei> for U256 {
    fn from(amount: Wei) -> Self {
        amount.0
    }
}

impl From<U256> for Wei {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

/// Error for invalid wei amounts.
#[derive(Debug, Clone, Error)]
pub enum InvalidAmount {
    /// Amount cannot be negative (rejected at the string-parse boundary).
    #[error("amount cannot be negative")]
    Negative,
    /// Failed to parse amount string as a base-10 integer.
    #[error("failed to parse amount")]
    ParseError,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PPM — parts-per-million fixed point multiplier representation
// ═══════════════════════════════════════════════════════════════════════════════

/// A multiplier represented as parts-per-million, e.g. `2_000_000` == `2.00x`.
///
/// Crash points, target cashout multipliers, and realized cashout
/// multipliers are all carried in this representation end to end so that
/// equality and ordering comparisons (`m_now + ε ≥ crash_point`) never touch
/// floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ppm(u64);

impl Ppm {
    /// One part-per-million unit denominator: `Ppm(UNIT)` == `1.00x`.
    pub const UNIT: u64 = 1_000_000;

    /// `1.00x`.
    pub const ONE: Self = Self(Self::UNIT);

    /// Construct directly from a raw ppm value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Construct from a floating-point multiplier, rounding to the nearest ppm.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn from_f64(value: f64) -> Self {
        Self((value * Self::UNIT as f64).round() as u64)
    }

    /// Get the raw ppm value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Convert to a floating-point multiplier (for display/serialization to
    /// clients, never for ledger arithmetic).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / Self::UNIT as f64
    }

    /// Saturating addition of a raw ppm delta (used for the epsilon buffer).
    #[must_use]
    pub const fn saturating_add_raw(&self, delta: u64) -> Self {
        Self(self.0.saturating_add(delta))
    }
}

impl fmt::Display for Ppm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.as_f64())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT ID — opaque idempotency key supplied by callers
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque client-supplied idempotency key, at most 64 bytes.
///
/// Used as the dedup key for `place_bet`, `cash_out`, and `withdraw` so that
/// a retried request never applies its effect twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Maximum length in bytes.
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a client-supplied string.
    ///
    /// # Errors
    /// Returns `InvalidClientId` if the string is empty or exceeds
    /// `MAX_LEN` bytes.
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidClientId> {
        let s = s.into();
        if s.is_empty() {
            return Err(InvalidClientId::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(InvalidClientId::TooLong(s.len()));
        }
        Ok(Self(s))
    }

    /// Get the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

impl TryFrom<String> for ClientId {
    type Error = InvalidClientId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

/// Error for invalid client ids.
#[derive(Debug, Clone, Copy, Error)]
pub enum InvalidClientId {
    /// Client id cannot be empty.
    #[error("client id cannot be empty")]
    Empty,
    /// Client id exceeds the maximum length.
    #[error("client id too long: {0} bytes (max {})", ClientId::MAX_LEN)]
    TooLong(usize),
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK NUMBER (for type clarity)
// ═══════════════════════════════════════════════════════════════════════════════

/// Block number newtype for clarity in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockNumber(u64);

impl BlockNumber {
    /// Create a new block number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Returns the next block number (saturating at `u64::MAX`).
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous block number (saturating at 0).
    #[must_use]
    pub const fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Returns `self` minus `n`, saturating at 0.
    #[must_use]
    pub const fn saturating_sub_u64(&self, n: u64) -> Self {
        Self(self.0.saturating_sub(n))
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl From<BlockNumber> for u64 {
    fn from(b: BlockNumber) -> Self {
        b.0
    }
}

impl From<BlockNumber> for i64 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(b: BlockNumber) -> Self {
        b.0 as Self
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod eth_address_tests {
        use super::*;

        #[test]
        fn from_hex_with_prefix() {
            let addr = EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap();
            assert_eq!(addr.to_hex(), "0x1234567890123456789012345678901234567890");
        }

        #[test]
        fn from_hex_wrong_length() {
            assert!(EthAddress::from_hex("0x1234").is_err());
        }

        #[test]
        fn zero_address() {
            assert!(EthAddress::ZERO.is_zero());
        }

        #[test]
        fn alloy_address_roundtrip() {
            let addr_hex = "0x1234567890123456789012345678901234567890";
            let eth_addr = EthAddress::from_hex(addr_hex).unwrap();
            let alloy_addr: Address = eth_addr.into();
            let back: EthAddress = alloy_addr.into();
            assert_eq!(eth_addr, back);
        }
    }

    mod wei_tests {
        use super::*;

        #[test]
        fn zero_is_zero() {
            assert!(Wei::ZERO.is_zero());
        }

        #[test]
        fn parse_and_display() {
            let amount = Wei::parse("1000000000000000000").unwrap();
            assert_eq!(amount.to_string(), "1000000000000000000");
        }

        #[test]
        fn checked_sub_insufficient() {
            let a = Wei::from_u128(100);
            let b = Wei::from_u128(200);
            assert!(a.checked_sub(b).is_none());
        }

        #[test]
        fn scale_ppm_double() {
            let stake = Wei::from_u128(1_000_000_000_000_000_000);
            let payout = stake.scale_ppm(Ppm::from_f64(2.0).raw());
            assert_eq!(payout, Wei::from_u128(2_000_000_000_000_000_000));
        }

        #[test]
        fn saturating_sub_floors_at_zero() {
            let a = Wei::from_u128(30);
            let b = Wei::from_u128(100);
            assert_eq!(a.saturating_sub(b), Wei::ZERO);
        }
    }

    mod ppm_tests {
        use super::*;

        #[test]
        fn one_is_unit() {
            assert_eq!(Ppm::ONE.raw(), Ppm::UNIT);
        }

        #[test]
        fn from_f64_round_trip() {
            let ppm = Ppm::from_f64(2.47);
            assert_eq!(ppm.raw(), 2_470_000);
            assert!((ppm.as_f64() - 2.47).abs() < 1e-9);
        }

        #[test]
        fn display_format() {
            assert_eq!(Ppm::from_f64(1.5).to_string(), "1.50x");
        }
    }

    mod client_id_tests {
        use super::*;

        #[test]
        fn rejects_empty() {
            assert!(ClientId::new("").is_err());
        }

        #[test]
        fn rejects_too_long() {
            let long = "a".repeat(65);
            assert!(ClientId::new(long).is_err());
        }

        #[test]
        fn accepts_valid() {
            assert!(ClientId::new("abc-123").is_ok());
        }
    }

    mod block_number_tests {
        use super::*;

        #[test]
        fn next_and_prev() {
            let block = BlockNumber::new(100);
            assert_eq!(block.next().get(), 101);
            assert_eq!(block.prev().get(), 99);
        }

        #[test]
        fn prev_saturates_at_zero() {
            assert_eq!(BlockNumber::new(0).prev().get(), 0);
        }
    }
}
