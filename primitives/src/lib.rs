//! # zether-primitives — ElGamal primitives for confidential balances
//!
//! This crate provides the cryptographic building blocks used by the
//! confidential-balance client:
//!
//! - [`elgamal`] — the additively-homomorphic encryption scheme over
//!   Ristretto, with bounded-range decryption (`0 ..= MAX_PLAIN`),
//!   plaintext adjustment and ciphertext serialization,
//! - [`KeyPair`] — account keys, either freshly sampled or derived
//!   deterministically from a seed,
//! - [`epoch_nonce`] — the per-epoch nonce-binding value `u` submitted with
//!   every state-mutating transaction, shared with the proof service by
//!   construction,
//! - [`sign_registration`] / [`verify_registration`] — the Schnorr
//!   proof-of-possession over the ledger's contract address submitted at
//!   registration.
//!
//! ## Ciphertext layout
//!
//! ```text
//! Enc(m, y, r) = (m·G + r·y, r·G)     serialized as left(32) || right(32)
//! ```
//!
//! All scalars sampled here use full 256-bit entropy
//! (`Scalar::from_bytes_mod_order_wide` over 64 random bytes).

pub mod elgamal;

use core::fmt;

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G,
    ristretto::{CompressedRistretto, RistrettoPoint},
};
use merlin::Transcript;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

pub use curve25519_dalek::{ristretto::RistrettoPoint as Point, scalar::Scalar};
pub use elgamal::{add_plain, decrypt, encrypt, signed_scalar, sub_plain, Ciphertext, MAX_PLAIN};

/// Compressed Ristretto point, the wire encoding used at every ledger boundary.
pub type SerializedPoint = [u8; 32];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElGamalError {
    /// The bounded discrete-log search exhausted `MAX_PLAIN` without a match.
    /// Signals a ciphertext/key mismatch or corrupted ledger state.
    #[error("unable to decrypt ciphertext: no plaintext found within bound")]
    DecryptionFailed,
    #[error("malformed point encoding")]
    InvalidPoint,
}

/// Generate a random scalar with full 256-bit entropy.
pub fn random_scalar<R: RngCore>(rng: &mut R) -> Scalar {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

pub fn point_to_bytes(p: &RistrettoPoint) -> SerializedPoint {
    p.compress().to_bytes()
}

pub fn point_from_bytes(bytes: &SerializedPoint) -> Result<RistrettoPoint, ElGamalError> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(ElGamalError::InvalidPoint)
}

/// An account key pair, `public = secret · G`.
///
/// The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct KeyPair {
    secret: Scalar,
    public: RistrettoPoint,
}

impl KeyPair {
    pub fn from_secret(secret: Scalar) -> Self {
        KeyPair {
            secret,
            public: secret * G,
        }
    }

    /// Fresh key pair from the supplied RNG.
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        Self::from_secret(random_scalar(rng))
    }

    /// Deterministic derivation from a caller-supplied seed. The same seed
    /// always yields the same pair; this is the account-recovery rule.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(b"zether.keypair.v1");
        hasher.update(seed);
        let wide: [u8; 64] = hasher.finalize().into();
        Self::from_secret(Scalar::from_bytes_mod_order_wide(&wide))
    }

    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    pub fn public(&self) -> &RistrettoPoint {
        &self.public
    }

    pub fn public_serialized(&self) -> SerializedPoint {
        point_to_bytes(&self.public)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public_serialized()))
            .finish_non_exhaustive()
    }
}

/// Registry key for a public key: Sha256 over the compressed encoding.
/// Must match the ledger's `registered` lookup.
pub fn public_key_hash(public: &RistrettoPoint) -> [u8; 32] {
    let digest = Sha256::digest(point_to_bytes(public));
    digest.into()
}

/// Epoch-specific group generator, hash-to-point of the epoch index.
pub fn epoch_generator(epoch: u64) -> RistrettoPoint {
    let mut input = [0u8; 24];
    input[0..16].copy_from_slice(b"zether.epoch.v1\0");
    input[16..24].copy_from_slice(&epoch.to_le_bytes());
    RistrettoPoint::hash_from_bytes::<Sha512>(&input)
}

/// The per-epoch nonce-binding value `u = epoch_generator(epoch) · secret`.
///
/// Deterministic in `(epoch, secret)`, so the ledger can reject a second
/// state-mutating proof from the same account within one epoch without
/// learning which account it belongs to.
pub fn epoch_nonce(epoch: u64, secret: &Scalar) -> RistrettoPoint {
    epoch_generator(epoch) * secret
}

fn registration_challenge(
    address: &[u8],
    public: &RistrettoPoint,
    commitment: &RistrettoPoint,
) -> Scalar {
    let mut t = Transcript::new(b"zether.register.v1");
    t.append_message(b"address", address);
    t.append_message(b"y", &point_to_bytes(public));
    t.append_message(b"K", &point_to_bytes(commitment));
    let mut wide = [0u8; 64];
    t.challenge_bytes(b"c", &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Schnorr proof-of-possession over the ledger's contract address, submitted
/// with a registration transaction. Returns the challenge/response pair
/// `(c, s)` with `s = k − c·x` for a fresh nonce `k`.
pub fn sign_registration<R: RngCore>(
    address: &[u8],
    keypair: &KeyPair,
    rng: &mut R,
) -> (Scalar, Scalar) {
    let k = random_scalar(rng);
    let commitment = k * G;
    let c = registration_challenge(address, &keypair.public, &commitment);
    let s = k - c * keypair.secret;
    (c, s)
}

/// Verify a registration signature: recompute `K' = s·G + c·y` and check the
/// challenge. The ledger side of [`sign_registration`].
pub fn verify_registration(address: &[u8], public: &RistrettoPoint, c: &Scalar, s: &Scalar) -> bool {
    let commitment = s * G + c * public;
    registration_challenge(address, public, &commitment) == *c
}
