//! The proof-service collaborator.
//!
//! Proof generation is an opaque external concern: the client assembles the
//! full witness (including secrets and randomness), hands it over, and passes
//! the resulting bytes to the ledger unmodified. The statement structs below
//! are the fixed input contract.

use thiserror::Error;

use zether_primitives::{Ciphertext, Point, Scalar};

use crate::ledger::{Address, Proof};

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("proof generation failed: {0}")]
    Generation(String),
    #[error("malformed statement: {0}")]
    Malformed(&'static str),
}

/// Witness for a burn (withdrawal) proof.
pub struct BurnStatement {
    /// The account's ciphertext after homomorphically removing the burned
    /// amount.
    pub new_balance: Ciphertext,
    pub public_key: Point,
    /// Epoch the balance was read at; the proof is only valid before the
    /// next rollover.
    pub epoch: u64,
    /// The home address receiving the unshielded funds.
    pub sender: Address,
    pub secret_key: Scalar,
    /// Plaintext balance remaining after the burn.
    pub remaining_balance: u64,
}

/// Witness for a transfer proof over a two-member anonymity set.
pub struct TransferStatement {
    /// Per-position ciphertexts after applying the deltas.
    pub new_balances: Vec<Ciphertext>,
    /// Per-position delta left components.
    pub delta_left: Vec<Point>,
    /// Shared delta right component (single randomness across the set).
    pub delta_right: Point,
    /// Anonymity-set public keys in on-chain position order.
    pub anonymity_set: Vec<Point>,
    pub epoch: u64,
    pub secret_key: Scalar,
    /// The shared encryption randomness `r`.
    pub randomness: Scalar,
    pub value: u64,
    /// Sender's plaintext available balance after the transfer.
    pub remaining_balance: u64,
    /// `[sender position, receiver position]` within the set.
    pub index: [usize; 2],
}

pub trait ProofService: Send + Sync + 'static {
    fn prove_burn(&self, statement: &BurnStatement) -> Result<Proof, ProofError>;
    fn prove_transfer(&self, statement: &TransferStatement) -> Result<Proof, ProofError>;
}
