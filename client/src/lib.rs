//! # zether-client — confidential-balance account client
//!
//! Client-side core of a confidential payment system: account balances live
//! on a ledger as ElGamal ciphertexts, and this crate drives the full
//! lifecycle against that ledger — key registration with proof-of-possession,
//! deposits from and withdrawals to a public asset, and transfers hidden
//! inside an anonymity set.
//!
//! The ledger transport and the zero-knowledge proof backend are
//! collaborators behind the [`Ledger`] and [`ProofService`] traits; this
//! crate owns everything in between — epoch projection of the local state,
//! the queue-and-retry discipline around epoch boundaries, anonymity-set
//! assembly, and the event-driven pending credit on the receiving side.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # async fn example<L: zether_client::Ledger, P: zether_client::ProofService>(
//! #     ledger: Arc<L>, prover: Arc<P>, home: [u8; 20],
//! # ) -> Result<(), zether_client::Error> {
//! let alice = zether_client::ConfidentialClient::init(ledger, prover, home).await?;
//! alice.register(Some(b"alice's long-lived secret".as_slice())).await?;
//! alice.deposit(100).await?;
//! # Ok(())
//! # }
//! ```

mod account;
mod client;
mod epoch;
pub mod ledger;
pub mod prover;

#[cfg(test)]
mod mock;

pub use account::{Account, AccountState};
pub use client::{Config, ConfidentialClient, Error};
pub use epoch::EpochClock;
pub use ledger::{
    AssetBacking, BurnCall, EncryptedAccountState, Ledger, LedgerError, TransferCall,
    TransferEvent, TxReceipt,
};
pub use prover::{BurnStatement, ProofError, ProofService, TransferStatement};
