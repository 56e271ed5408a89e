//! Wire decoding of `personal_sign` signatures.
//!
//! Recovery and the EIP-191 envelope are handled by `siwe::Message::verify_eip191`.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature hex: {0}")]
    InvalidHex(String),

    #[error("invalid signature length: expected 65 bytes, got {0}")]
    InvalidLength(usize),
}

/// Decode a `0x`-prefixed (or bare) 65-byte `r || s || v` signature.
pub fn decode_signature(signature_hex: &str) -> Result<[u8; 65], SignatureError> {
    let digits = signature_hex
        .strip_prefix("0x")
        .unwrap_or(signature_hex);
    let bytes = hex::decode(digits).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;

    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidLength(len))
}
