//! Identity cryptography for podx
//!
//! Identity keys are secp256k1. Every hash is Keccak-256, and signatures are
//! 65-byte recoverable ECDSA signatures `r ‖ s ‖ v` over a 32-byte digest,
//! so a verifier learns the signer's public key from the signature itself.

use crate::error::{Error, Result};
use crate::types::{Bytes32, Identity};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

/// Length of a recoverable signature
pub const SIGNATURE_LEN: usize = 65;
/// Length of an uncompressed SEC1 public key
pub const PUBLIC_KEY_LEN: usize = 65;

/// A recoverable signature `r(32) ‖ s(32) ‖ v(1)`
pub type SignatureBytes = [u8; SIGNATURE_LEN];
/// An uncompressed public key `0x04 ‖ X(32) ‖ Y(32)`
pub type PublicKeyBytes = [u8; PUBLIC_KEY_LEN];

/// Keccak-256 of `data`
pub fn keccak256(data: &[u8]) -> Bytes32 {
    Keccak256::digest(data).into()
}

/// Derive the 20-byte identity of a public key.
///
/// `Identity = keccak256(X ‖ Y)[12..32]`
pub fn identity_of(public_key: &VerifyingKey) -> Identity {
    let encoded = encode_public_key(public_key);
    let hash = keccak256(&encoded[1..]);
    let mut id = [0u8; 20];
    id.copy_from_slice(&hash[12..]);
    Identity(id)
}

/// Encode a public key as 65 uncompressed bytes
pub fn encode_public_key(public_key: &VerifyingKey) -> PublicKeyBytes {
    let point = public_key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Decode a public key from SEC1 bytes
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| Error::auth("invalid public key encoding"))
}

/// Recover the signer's public key from a signature over `digest`.
pub fn recover_public_key(digest: &Bytes32, signature: &[u8]) -> Result<VerifyingKey> {
    if signature.len() != SIGNATURE_LEN {
        return Err(Error::auth(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|_| Error::auth("malformed signature"))?;
    let recid = RecoveryId::from_byte(signature[64])
        .ok_or_else(|| Error::auth("invalid recovery id"))?;
    VerifyingKey::recover_from_prehash(digest, &sig, recid)
        .map_err(|_| Error::auth("signature recovery failed"))
}

/// Check that `signature` over `digest` was produced by `expected`.
pub fn verify_signer(digest: &Bytes32, signature: &[u8], expected: &VerifyingKey) -> Result<()> {
    let recovered = recover_public_key(digest, signature)?;
    if &recovered != expected {
        return Err(Error::auth(format!(
            "signature recovers to {}, expected {}",
            identity_of(&recovered),
            identity_of(expected)
        )));
    }
    Ok(())
}

/// secp256k1 keypair for node identity
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create from a 32-byte secret scalar (for deterministic setups and tests)
    pub fn from_seed(seed: &Bytes32) -> Result<Self> {
        let signing_key = SigningKey::from_slice(seed)
            .map_err(|_| Error::auth("seed is not a valid secp256k1 scalar"))?;
        Ok(Self { signing_key })
    }

    /// Get the verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(&self.signing_key)
    }

    /// Get the uncompressed public key bytes
    pub fn public_key(&self) -> PublicKeyBytes {
        encode_public_key(&self.verifying_key())
    }

    pub fn identity(&self) -> Identity {
        identity_of(&self.verifying_key())
    }

    /// Sign a 32-byte digest
    pub fn sign_digest(&self, digest: &Bytes32) -> Result<SignatureBytes> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| Error::auth(format!("signing failed: {}", e)))?;
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte();
        Ok(out)
    }

    /// Sign `keccak256(message)`
    pub fn sign(&self, message: &[u8]) -> Result<SignatureBytes> {
        self.sign_digest(&keccak256(message))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}
