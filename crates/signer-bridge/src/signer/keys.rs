//! Key material capability.
//!
//! The signing core only ever talks to a [`KeyMaterial`]. Implementations
//! derive, sign, encrypt and decrypt in memory and never hand out secret
//! bytes.

use bitcoin::secp256k1::{All, Keypair, Message, Secp256k1};
use nostr::nips::{nip04, nip44};
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::error::BridgeError;

/// Errors raised by key material.
///
/// Messages carry peer keys and primitive error text only.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid peer public key {0}: {1}")]
    InvalidPeerKey(String, String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),
}

impl From<KeyError> for BridgeError {
    fn from(err: KeyError) -> Self {
        BridgeError::CryptoOperationFailed(err.to_string())
    }
}

/// Primitives backed by the signer's private key.
///
/// Calls are synchronous and in-memory; they run under the per-app signing
/// lock.
pub trait KeyMaterial: Send + Sync {
    /// x-only public key, lowercase hex
    fn public_key_hex(&self) -> String;

    /// BIP-340 Schnorr signature over a 32-byte digest.
    fn sign_digest(&self, digest: [u8; 32]) -> Result<[u8; 64], KeyError>;

    fn nip04_encrypt(&self, peer: &str, plaintext: &str) -> Result<String, KeyError>;

    fn nip04_decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, KeyError>;

    fn nip44_encrypt(&self, peer: &str, plaintext: &str) -> Result<String, KeyError>;

    fn nip44_decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, KeyError>;
}

/// A secp256k1 key held in process memory.
pub struct LocalKey {
    secp: Secp256k1<All>,
    keypair: Keypair,
    public_key_hex: String,
}

impl LocalKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        loop {
            rand::rng().fill_bytes(&mut bytes);
            if let Ok(key) = Self::from_bytes(&bytes) {
                bytes.zeroize();
                return key;
            }
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let keypair =
            Keypair::from_seckey_slice(&secp, secret).map_err(|_| KeyError::InvalidSecretKey)?;
        let (xonly, _parity) = keypair.x_only_public_key();
        Ok(Self {
            public_key_hex: hex::encode(xonly.serialize()),
            secp,
            keypair,
        })
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim()).map_err(|_| KeyError::InvalidSecretKey)?,
        );
        let secret: &[u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Self::from_bytes(secret)
    }

    fn nostr_keys(&self, peer: &str) -> Result<(nostr::SecretKey, nostr::PublicKey), KeyError> {
        let peer_key = nostr::PublicKey::from_hex(peer)
            .map_err(|e| KeyError::InvalidPeerKey(peer.to_string(), e.to_string()))?;
        let mut bytes = self.keypair.secret_bytes();
        let secret = nostr::SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidSecretKey);
        bytes.zeroize();
        Ok((secret?, peer_key))
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKey")
            .field("public_key", &self.public_key_hex)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl KeyMaterial for LocalKey {
    fn public_key_hex(&self) -> String {
        self.public_key_hex.clone()
    }

    fn sign_digest(&self, digest: [u8; 32]) -> Result<[u8; 64], KeyError> {
        let message = Message::from_digest(digest);
        let sig = self.secp.sign_schnorr_no_aux_rand(&message, &self.keypair);
        Ok(sig.serialize())
    }

    fn nip04_encrypt(&self, peer: &str, plaintext: &str) -> Result<String, KeyError> {
        let (secret, peer) = self.nostr_keys(peer)?;
        nip04::encrypt(&secret, &peer, plaintext).map_err(|e| KeyError::Encryption(e.to_string()))
    }

    fn nip04_decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, KeyError> {
        let (secret, peer) = self.nostr_keys(peer)?;
        nip04::decrypt(&secret, &peer, ciphertext).map_err(|e| KeyError::Decryption(e.to_string()))
    }

    fn nip44_encrypt(&self, peer: &str, plaintext: &str) -> Result<String, KeyError> {
        let (secret, peer) = self.nostr_keys(peer)?;
        nip44::encrypt(&secret, &peer, plaintext, nip44::Version::V2)
            .map_err(|e| KeyError::Encryption(e.to_string()))
    }

    fn nip44_decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, KeyError> {
        let (secret, peer) = self.nostr_keys(peer)?;
        nip44::decrypt(&secret, &peer, ciphertext).map_err(|e| KeyError::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-340 test vector 0
    const SECRET_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000003";
    const PUBKEY_HEX: &str = "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

    #[test]
    fn test_public_key_from_known_secret() {
        let key = LocalKey::from_hex(SECRET_HEX).unwrap();
        assert_eq!(key.public_key_hex(), PUBKEY_HEX);
    }

    #[test]
    fn test_invalid_secrets_rejected() {
        assert!(LocalKey::from_hex("zz").is_err());
        assert!(LocalKey::from_hex("00").is_err());
        assert!(LocalKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = LocalKey::from_hex(SECRET_HEX).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(SECRET_HEX));
    }

    #[test]
    fn test_nip04_and_nip44_between_two_keys() {
        let alice = LocalKey::generate();
        let bob = LocalKey::generate();

        let ciphertext = alice.nip04_encrypt(&bob.public_key_hex(), "hello bob").unwrap();
        assert_eq!(
            bob.nip04_decrypt(&alice.public_key_hex(), &ciphertext).unwrap(),
            "hello bob"
        );

        let ciphertext = alice.nip44_encrypt(&bob.public_key_hex(), "hello again").unwrap();
        assert_eq!(
            bob.nip44_decrypt(&alice.public_key_hex(), &ciphertext).unwrap(),
            "hello again"
        );
    }

    #[test]
    fn test_bad_peer_key_is_reported_without_secret() {
        let key = LocalKey::from_hex(SECRET_HEX).unwrap();
        let err = key.nip44_encrypt("not-a-key", "x").unwrap_err();
        assert!(matches!(err, KeyError::InvalidPeerKey(..)));
        assert!(!err.to_string().contains(SECRET_HEX));
        assert!(matches!(
            BridgeError::from(err),
            BridgeError::CryptoOperationFailed(_)
        ));
    }
}
