//! Channel cryptography
//!
//! Ephemeral X25519 agreement, HKDF-SHA256 key derivation, and
//! ChaCha20-Poly1305 framing keys for the secure channel.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, SharedSecret};

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Nonce space exhausted")]
    NonceExhausted,
}

const INITIATOR_TO_RESPONDER: &[u8] = b"podx initiator->responder";
const RESPONDER_TO_INITIATOR: &[u8] = b"podx responder->initiator";

/// Directional AEAD keys derived from one X25519 agreement
pub struct SessionKeys {
    encrypt: ChaCha20Poly1305,
    decrypt: ChaCha20Poly1305,
    send_counter: u64,
    recv_counter: u64,
}

impl SessionKeys {
    /// Derive session keys from the shared secret and our role.
    ///
    /// `context` binds the keys to the handshake transcript.
    pub fn derive(
        shared_secret: &SharedSecret,
        is_initiator: bool,
        context: &[u8],
    ) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(context), shared_secret.as_bytes());

        let (enc_info, dec_info) = if is_initiator {
            (INITIATOR_TO_RESPONDER, RESPONDER_TO_INITIATOR)
        } else {
            (RESPONDER_TO_INITIATOR, INITIATOR_TO_RESPONDER)
        };

        let mut encrypt_key = [0u8; 32];
        let mut decrypt_key = [0u8; 32];
        hkdf.expand(enc_info, &mut encrypt_key)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        hkdf.expand(dec_info, &mut decrypt_key)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        Ok(Self {
            encrypt: ChaCha20Poly1305::new_from_slice(&encrypt_key)
                .map_err(|_| CryptoError::InvalidKeyLength)?,
            decrypt: ChaCha20Poly1305::new_from_slice(&decrypt_key)
                .map_err(|_| CryptoError::InvalidKeyLength)?,
            send_counter: 0,
            recv_counter: 0,
        })
    }

    /// Seal the next outgoing frame body.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = counter_nonce(self.send_counter);
        self.send_counter = self
            .send_counter
            .checked_add(1)
            .ok_or(CryptoError::NonceExhausted)?;
        self.encrypt
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open the next incoming frame body. Frames must arrive in order.
    pub fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = counter_nonce(self.recv_counter);
        let plaintext = self
            .decrypt
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptionFailed)?;
        self.recv_counter = self
            .recv_counter
            .checked_add(1)
            .ok_or(CryptoError::NonceExhausted)?;
        Ok(plaintext)
    }
}

fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// X25519 ephemeral key exchange
pub struct EphemeralKeyExchange {
    secret: EphemeralSecret,
    public: X25519Public,
}

impl EphemeralKeyExchange {
    /// Generate new ephemeral keypair
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    /// Get the public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Perform key exchange and derive shared secret
    pub fn exchange(self, their_public: &[u8; 32]) -> SharedSecret {
        let their_public = X25519Public::from(*their_public);
        self.secret.diffie_hellman(&their_public)
    }
}

impl Default for EphemeralKeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_keys() -> (SessionKeys, SessionKeys) {
        let alice = EphemeralKeyExchange::new();
        let bob = EphemeralKeyExchange::new();
        let alice_pub = alice.public_key();
        let bob_pub = bob.public_key();

        let alice_shared = alice.exchange(&bob_pub);
        let bob_shared = bob.exchange(&alice_pub);
        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());

        (
            SessionKeys::derive(&alice_shared, true, b"test").unwrap(),
            SessionKeys::derive(&bob_shared, false, b"test").unwrap(),
        )
    }

    #[test]
    fn test_session_encryption_both_directions() {
        let (mut alice, mut bob) = paired_keys();

        let ct = alice.encrypt(b"secret message", b"\x11").unwrap();
        assert_eq!(bob.decrypt(&ct, b"\x11").unwrap(), b"secret message");

        let ct = bob.encrypt(b"reply", b"\x10").unwrap();
        assert_eq!(alice.decrypt(&ct, b"\x10").unwrap(), b"reply");
    }

    #[test]
    fn test_wrong_aad_rejected() {
        let (mut alice, mut bob) = paired_keys();
        let ct = alice.encrypt(b"data", b"\x11").unwrap();
        assert!(matches!(
            bob.decrypt(&ct, b"\x10"),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_replayed_frame_rejected() {
        let (mut alice, mut bob) = paired_keys();
        let first = alice.encrypt(b"one", b"").unwrap();
        let _second = alice.encrypt(b"two", b"").unwrap();

        assert!(bob.decrypt(&first, b"").is_ok());
        assert!(bob.decrypt(&first, b"").is_err());
    }

    #[test]
    fn test_context_separates_keys() {
        let alice = EphemeralKeyExchange::new();
        let bob = EphemeralKeyExchange::new();
        let alice_pub = alice.public_key();
        let bob_shared = bob.exchange(&alice_pub);
        let alice_shared = alice.exchange(&[9u8; 32]);

        let mut a = SessionKeys::derive(&alice_shared, true, b"one").unwrap();
        let mut b = SessionKeys::derive(&bob_shared, false, b"two").unwrap();
        let ct = a.encrypt(b"x", b"").unwrap();
        assert!(b.decrypt(&ct, b"").is_err());
    }
}
