//! Verify that interaction requests were signed by the platform.
//!
//! Each request carries an Ed25519 signature (hex) over the timestamp header
//! followed by the raw body, made with the application's key pair.

use std::convert::TryFrom;

use anyhow::{Error, Result};
use ed25519_dalek::{PublicKey, Signature, Verifier};

pub const HEADER_SIGNATURE: &str = "x-signature-ed25519";
pub const HEADER_TIMESTAMP: &str = "x-signature-timestamp";

/// Parse the application public key from its hex representation.
pub fn public_key_from_hex(key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(key.trim()).map_err(|_| Error::msg("public key is not hex"))?;
    PublicKey::from_bytes(&bytes).map_err(|_| Error::msg("public key is not an Ed25519 key"))
}

/// Check `signature` (hex) over `timestamp` ‖ `body`.
pub fn verify_interaction(
    public_key: &PublicKey,
    signature: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<()> {
    let signature = hex::decode(signature).map_err(|_| Error::msg("signature is not hex"))?;
    let signature = Signature::try_from(signature.as_slice())
        .map_err(|_| Error::msg("signature has the wrong length"))?;
    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    public_key
        .verify(&message, &signature)
        .map_err(|_| Error::msg("signature does not match"))
}
