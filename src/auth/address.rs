//! Ethereum account addresses (EIP-55).

use alloy_primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 20-byte Ethereum account address.
///
/// `Display` renders the canonical lower-case form, which is also the form
/// used as a nonce subject and returned to clients after sign-in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvmAddress(Address);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with 0x")]
    MissingPrefix,

    #[error("address must be 40 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("address is not valid hex")]
    InvalidHex,

    #[error("address has an invalid EIP-55 checksum")]
    BadChecksum,
}

impl EvmAddress {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(Address::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0 .0 .0
    }

    /// Lower-case `0x`-prefixed hex.
    pub fn to_lowercase_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Mixed-case EIP-55 checksum encoding.
    pub fn to_checksum(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Parse an address, lenient on case.
    ///
    /// All-lower and all-upper hex are accepted as-is. Mixed case is treated as
    /// an EIP-55 checksum and must match exactly.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;

        if digits.len() != 40 {
            return Err(AddressError::InvalidLength(digits.len()));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressError::InvalidHex)?;
        let address = Self::from_bytes(bytes);

        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower && address.to_checksum()[2..] != *digits {
            return Err(AddressError::BadChecksum);
        }

        Ok(address)
    }
}

impl From<[u8; 20]> for EvmAddress {
    fn from(bytes: [u8; 20]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for EvmAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lowercase_hex())
    }
}

impl fmt::Debug for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmAddress({})", self.to_lowercase_hex())
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_lowercase_hex())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
