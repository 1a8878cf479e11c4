//! The ledger collaborator: a deployed confidential-balance contract plus its
//! transaction and event transport.
//!
//! Submission is two-phase — `submit_*` resolves with the transaction hash as
//! soon as the transaction is accepted for inclusion, and
//! [`Ledger::wait_receipt`] resolves with the mined outcome. The split
//! matters for transfers: the client must record its own transaction hash
//! before the `TransferOccurred` echo can arrive.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use zether_primitives::SerializedPoint;

/// Compressed ciphertext, `left(32) || right(32)`.
pub type SerializedCiphertext = [u8; 64];
pub type TxHash = [u8; 32];
/// The home account on the ledger's native address space.
pub type Address = [u8; 20];
/// Opaque proof payload, passed through to the ledger unmodified.
pub type Proof = Vec<u8>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger call failed: {0}")]
    Call(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),
    #[error("event subscription closed")]
    SubscriptionClosed,
}

/// How the confidential pool is funded: directly with the chain's native
/// asset, or through a token contract that needs an allowance first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetBacking {
    Native,
    Token,
}

/// `TransferOccurred` event payload: the anonymity-set members of a mined
/// transfer, in on-chain position order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferEvent {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub parties: Vec<SerializedPoint>,
}

/// Ledger-published encrypted account fields.
#[derive(Clone, Copy, Debug)]
pub struct EncryptedAccountState {
    pub available: SerializedCiphertext,
    pub pending: SerializedCiphertext,
}

/// Input of a `transfer` transaction: one left component per anonymity-set
/// position, one shared right component, the set itself, the per-epoch nonce
/// binding and the proof.
#[derive(Clone, Debug)]
pub struct TransferCall {
    pub c: Vec<SerializedPoint>,
    pub d: SerializedPoint,
    pub parties: Vec<SerializedPoint>,
    pub u: SerializedPoint,
    pub proof: Proof,
}

#[derive(Clone, Debug)]
pub struct BurnCall {
    pub public_key: SerializedPoint,
    pub value: u64,
    pub u: SerializedPoint,
    pub proof: Proof,
}

#[derive(Clone, Copy, Debug)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// The deployed contract surface the client consumes. Transport, gas and
/// signing concerns live behind the implementation; once a call resolves it
/// is assumed reliable.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Epoch length; read once at client initialization.
    async fn epoch_length(&self) -> Result<Duration, LedgerError>;

    /// Tokens per confidential unit; read once at client initialization.
    async fn unit(&self) -> Result<u64, LedgerError>;

    async fn backing(&self) -> Result<AssetBacking, LedgerError>;

    /// The contract's own address — the message of the registration
    /// proof-of-possession.
    async fn contract_address(&self) -> Result<Address, LedgerError>;

    /// Whether a public-key hash is present in the registry.
    async fn registered(&self, public_key_hash: [u8; 32]) -> Result<bool, LedgerError>;

    /// Encrypted balances for `keys`, projected by the contract to `epoch`.
    /// Unregistered keys yield the identity ciphertext.
    async fn get_balance(
        &self,
        keys: &[SerializedPoint],
        epoch: u64,
    ) -> Result<Vec<SerializedCiphertext>, LedgerError>;

    /// Raw `available`/`pending` ciphertexts as currently stored.
    async fn get_account_state(
        &self,
        key: SerializedPoint,
    ) -> Result<EncryptedAccountState, LedgerError>;

    async fn submit_register(
        &self,
        from: Address,
        key: SerializedPoint,
        challenge: [u8; 32],
        response: [u8; 32],
    ) -> Result<TxHash, LedgerError>;

    /// Token-backed deployments only: grant the contract an allowance of
    /// `amount` base tokens before funding.
    async fn approve(&self, from: Address, amount: u128) -> Result<TxHash, LedgerError>;

    /// Fund `key` with `value` units from the `from` account.
    async fn submit_fund(
        &self,
        from: Address,
        key: SerializedPoint,
        value: u64,
    ) -> Result<TxHash, LedgerError>;

    async fn submit_burn(&self, from: Address, call: BurnCall) -> Result<TxHash, LedgerError>;

    async fn submit_transfer(
        &self,
        from: Address,
        call: TransferCall,
    ) -> Result<TxHash, LedgerError>;

    /// Resolve a submitted transaction to its mined receipt, or the revert
    /// error.
    async fn wait_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, LedgerError>;

    /// Standing subscription to `TransferOccurred` events.
    async fn subscribe_transfers(&self) -> Result<mpsc::Receiver<TransferEvent>, LedgerError>;

    /// Unix-millisecond timestamp of a mined block.
    async fn block_timestamp(&self, block_number: u64) -> Result<u64, LedgerError>;

    /// Full input of a mined transfer transaction, for per-position delta
    /// decoding on the receiving side.
    async fn transfer_input(&self, tx_hash: TxHash) -> Result<TransferCall, LedgerError>;
}
