//! Multibase/multicodec fingerprints for Ed25519 public keys.
//!
//! A fingerprint is the multicodec Ed25519 header followed by the 32 raw key
//! bytes, base58btc-encoded with a multibase `z` prefix. Cryptonym DIDs embed
//! the fingerprint of their initial capability-invocation key.

use multibase::Base;
use thiserror::Error;

pub const ED25519_CODEC: [u8; 2] = [0xed, 0x01];
pub const ED25519_KEY_LENGTH: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Invalid multibase encoding")]
    InvalidEncoding,
    #[error("Unexpected multicodec header")]
    WrongCodec,
    #[error("Invalid key length")]
    WrongLength,
}

/// Fingerprint of an Ed25519 public key: `z` + base58btc(0xed 0x01 ∥ key).
pub fn fingerprint(public_key: &[u8; ED25519_KEY_LENGTH]) -> String {
    let mut bytes = Vec::with_capacity(ED25519_CODEC.len() + ED25519_KEY_LENGTH);
    bytes.extend_from_slice(&ED25519_CODEC);
    bytes.extend_from_slice(public_key);
    multibase::encode(Base::Base58Btc, bytes)
}

/// Decode a fingerprint back to the raw public key, rejecting any string
/// whose multibase prefix, multicodec header, or length disagrees.
pub fn decode_fingerprint(input: &str) -> Result<[u8; ED25519_KEY_LENGTH], FingerprintError> {
    let (base, data) =
        multibase::decode(input).map_err(|_| FingerprintError::InvalidEncoding)?;
    if base != Base::Base58Btc {
        return Err(FingerprintError::InvalidEncoding);
    }
    if data.len() < ED25519_CODEC.len()
        || data[0] != ED25519_CODEC[0]
        || data[1] != ED25519_CODEC[1]
    {
        return Err(FingerprintError::WrongCodec);
    }
    data[ED25519_CODEC.len()..]
        .try_into()
        .map_err(|_| FingerprintError::WrongLength)
}

/// Decode a `publicKeyBase58` property (bare base58btc, no multibase prefix).
pub fn public_key_from_base58(
    public_key_base58: &str,
) -> Result<[u8; ED25519_KEY_LENGTH], FingerprintError> {
    let bytes = bs58::decode(public_key_base58)
        .into_vec()
        .map_err(|_| FingerprintError::InvalidEncoding)?;
    bytes.try_into().map_err(|_| FingerprintError::WrongLength)
}
