//! Derives a TRON address from a candidate private key and validates it
//! against the deal's expected signer, per `pendingKeyValidation` sessions.
//!
//! Address derivation: secp256k1 public key (uncompressed, minus the 0x04
//! prefix) -> Keccak-256 -> last 20 bytes -> prepend the TRON address-version
//! byte `0x41` -> Base58Check (double-SHA256 checksum), the same recipe the
//! chain itself uses and the one `bs58`/`sha3`/`k256` exist in this crate to
//! express (no teacher equivalent; these three crates are pulled in fresh).

use k256::ecdsa::SigningKey;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;

const TRON_ADDRESS_VERSION: u8 = 0x41;
pub const MAX_KEY_VALIDATION_ATTEMPTS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyValidationError {
    #[error("candidate key is not a valid secp256k1 private key")]
    MalformedKey,
    #[error("derived address does not match the expected signer")]
    AddressMismatch,
    #[error("validation attempts exhausted, session invalidated")]
    AttemptsExhausted,
}

/// Mints a fresh secp256k1 keypair and its TRON address: used for the two
/// per-deal ephemeral signer keys and the multisig wallet's own address.
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::random(&mut rand::thread_rng());
    let private_key_hex = hex::encode(signing_key.to_bytes());
    let address = derive_address(&private_key_hex).expect("freshly generated key always derives a valid address");
    (private_key_hex, address)
}

/// Derives the base58check TRON address for a hex-encoded secp256k1 private key.
pub fn derive_address(private_key_hex: &str) -> Result<String, KeyValidationError> {
    let key_bytes = hex::decode(private_key_hex.trim_start_matches("0x")).map_err(|_| KeyValidationError::MalformedKey)?;
    let signing_key = SigningKey::from_slice(&key_bytes).map_err(|_| KeyValidationError::MalformedKey)?;
    let verifying_key = signing_key.verifying_key();
    let uncompressed = verifying_key.to_encoded_point(false);
    let pubkey_bytes = &uncompressed.as_bytes()[1..]; // drop the 0x04 prefix

    let hash = Keccak256::digest(pubkey_bytes);
    let mut address_bytes = vec![TRON_ADDRESS_VERSION];
    address_bytes.extend_from_slice(&hash[12..]);

    Ok(base58check_encode(&address_bytes))
}

fn base58check_encode(payload: &[u8]) -> String {
    let checksum = Sha256::digest(Sha256::digest(payload));
    let mut full = payload.to_vec();
    full.extend_from_slice(&checksum[..4]);
    bs58::encode(full).into_string()
}

/// Validates a candidate private key against the expected signer address.
/// Callers are responsible for bumping and persisting the session's attempt
/// count; this function is pure.
pub fn validate(candidate_private_key: &str, expected_address: &str) -> Result<(), KeyValidationError> {
    let derived = derive_address(candidate_private_key)?;
    if derived == expected_address {
        Ok(())
    } else {
        Err(KeyValidationError::AddressMismatch)
    }
}

/// Applies the attempt-count ceiling from spec.md §4.5: once `attempts`
/// reaches [`MAX_KEY_VALIDATION_ATTEMPTS`], the session must be invalidated
/// regardless of whether this particular candidate matches.
pub fn check_attempt_budget(attempts: u32) -> Result<(), KeyValidationError> {
    if attempts >= MAX_KEY_VALIDATION_ATTEMPTS {
        Err(KeyValidationError::AttemptsExhausted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_a_stable_address_for_a_fixed_key() {
        let key = "0000000000000000000000000000000000000000000000000000000000000001";
        let addr = derive_address(&key[2..]).unwrap();
        assert!(addr.starts_with('T'), "TRON mainnet addresses base58-encode to a leading T: got {addr}");
        // Re-deriving the same key must be deterministic.
        assert_eq!(addr, derive_address(&key[2..]).unwrap());
    }

    #[test]
    fn malformed_key_is_rejected() {
        let err = derive_address("not-hex").unwrap_err();
        assert_eq!(err, KeyValidationError::MalformedKey);
    }

    #[test]
    fn mismatched_address_fails_validation() {
        let key = "0000000000000000000000000000000000000000000000000000000000000001";
        let err = validate(key, "TNotTheRightAddress").unwrap_err();
        assert_eq!(err, KeyValidationError::AddressMismatch);
    }

    #[test]
    fn matching_address_validates() {
        let key = "0000000000000000000000000000000000000000000000000000000000000001";
        let addr = derive_address(key).unwrap();
        validate(key, &addr).unwrap();
    }

    #[test]
    fn generated_keypair_validates_against_its_own_address() {
        let (private_key, address) = generate_keypair();
        validate(&private_key, &address).unwrap();
    }

    #[test]
    fn attempt_budget_trips_at_max() {
        assert!(check_attempt_budget(4).is_ok());
        assert_eq!(check_attempt_budget(5).unwrap_err(), KeyValidationError::AttemptsExhausted);
    }
}
