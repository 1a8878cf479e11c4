//! Additively-homomorphic ElGamal over Ristretto with bounded-range
//! decryption.
//!
//! Plaintexts live in `0 ..= MAX_PLAIN`. Decryption recovers `gB = m·G` and
//! solves the discrete log with a baby-step/giant-step search: a lazily built
//! table of 2^16 baby steps, then at most 2^16 giant strides. The observable
//! contract is identical to a linear scan — the first match within the bound
//! is returned, anything beyond it is [`ElGamalError::DecryptionFailed`].

use std::collections::HashMap;
use std::sync::OnceLock;

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G, ristretto::RistrettoPoint, scalar::Scalar,
    traits::Identity,
};
use serde::{Deserialize, Serialize};

use crate::{point_from_bytes, point_to_bytes, ElGamalError};

/// Largest representable plaintext. Values outside `(0, MAX_PLAIN]` are a
/// contract violation for the client-facing operations.
pub const MAX_PLAIN: u64 = (1 << 32) - 1;

/// Width of the baby-step table; giant strides move by the same amount.
const BABY_STEPS: u64 = 1 << 16;

/// `Enc(m, y, r) = (m·G + r·y, r·G)`.
///
/// Ciphertexts under the same public key combine component-wise
/// ([`Ciphertext::combine`]); the plaintext may also be adjusted without the
/// key via [`add_plain`] / [`sub_plain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub left: RistrettoPoint,
    pub right: RistrettoPoint,
}

impl Ciphertext {
    /// The identity pair — the ledger's value for an absent account, and a
    /// valid encryption of zero under any key.
    pub fn zero() -> Self {
        Ciphertext {
            left: RistrettoPoint::identity(),
            right: RistrettoPoint::identity(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.left == RistrettoPoint::identity() && self.right == RistrettoPoint::identity()
    }

    /// Homomorphic addition: `Enc(m1) ⊕ Enc(m2) = Enc(m1 + m2)` for
    /// ciphertexts under the same public key.
    #[must_use]
    pub fn combine(&self, other: &Ciphertext) -> Ciphertext {
        Ciphertext {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }

    /// `left(32) || right(32)`, compressed.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[0..32].copy_from_slice(&point_to_bytes(&self.left));
        out[32..64].copy_from_slice(&point_to_bytes(&self.right));
        out
    }

    /// Inverse of [`Ciphertext::to_bytes`]; a lossless bijection for valid
    /// points.
    pub fn from_bytes(bytes: &[u8; 64]) -> Result<Self, ElGamalError> {
        let mut left = [0u8; 32];
        let mut right = [0u8; 32];
        left.copy_from_slice(&bytes[0..32]);
        right.copy_from_slice(&bytes[32..64]);
        Ok(Ciphertext {
            left: point_from_bytes(&left)?,
            right: point_from_bytes(&right)?,
        })
    }
}

/// Map a signed plaintext adjustment into the scalar field.
pub fn signed_scalar(k: i64) -> Scalar {
    if k < 0 {
        -Scalar::from(k.unsigned_abs())
    } else {
        Scalar::from(k as u64)
    }
}

/// Encrypt `m` under public key `y` with randomness `r`. The plaintext is a
/// scalar so internal callers can encrypt a negative delta.
pub fn encrypt(m: &Scalar, y: &RistrettoPoint, r: &Scalar) -> Ciphertext {
    Ciphertext {
        left: m * G + r * y,
        right: r * G,
    }
}

/// Adjust the plaintext by `k` without the key: `left += k·G`, `right`
/// unchanged. `k` may be negative.
#[must_use]
pub fn add_plain(ct: &Ciphertext, k: i64) -> Ciphertext {
    Ciphertext {
        left: ct.left + signed_scalar(k) * G,
        right: ct.right,
    }
}

#[must_use]
pub fn sub_plain(ct: &Ciphertext, k: i64) -> Ciphertext {
    add_plain(ct, -k)
}

fn baby_table() -> &'static HashMap<[u8; 32], u32> {
    static TABLE: OnceLock<HashMap<[u8; 32], u32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::with_capacity(BABY_STEPS as usize);
        let mut acc = RistrettoPoint::identity();
        for j in 0..BABY_STEPS {
            table.insert(point_to_bytes(&acc), j as u32);
            acc += G;
        }
        table
    })
}

/// Decrypt a ciphertext with secret key `x`.
///
/// Computes `gB = left − x·right` and searches for the `m ≤ MAX_PLAIN` with
/// `m·G == gB`.
///
/// # Errors
/// [`ElGamalError::DecryptionFailed`] when no plaintext within the bound
/// matches — a wrong key or corrupted ciphertext. Never silently returns an
/// incorrect value.
pub fn decrypt(ct: &Ciphertext, x: &Scalar) -> Result<u64, ElGamalError> {
    let gb = ct.left - x * ct.right;
    let table = baby_table();
    let stride = Scalar::from(BABY_STEPS) * G;

    let mut cursor = gb;
    for i in 0..=(MAX_PLAIN / BABY_STEPS) {
        if let Some(&j) = table.get(&point_to_bytes(&cursor)) {
            return Ok(i * BABY_STEPS + u64::from(j));
        }
        cursor -= stride;
    }
    Err(ElGamalError::DecryptionFailed)
}
