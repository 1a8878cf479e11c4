//! Per-client encrypted-balance bookkeeping.
//!
//! [`AccountState`] is the local mirror of one ledger-side balance entry:
//! the amounts the client believes are spendable (`available`), the amounts
//! posted this epoch but not yet rolled over (`pending`), whether this
//! epoch's single state-mutating nonce has been consumed, and the epoch the
//! state was last projected to.
//!
//! All mutation flows through [`AccountState::project`],
//! [`AccountState::credit_pending`] and [`AccountState::debit`] (plus the
//! wholesale overwrite used by account recovery); the fields are not
//! otherwise writable from outside this module.

use zether_primitives::KeyPair;

/// Local view of an encrypted account at some epoch.
///
/// `available` and `pending` are signed: a debit posts to `pending` of the
/// epoch being spent from, exactly as the ledger books it, so `pending` is
/// transiently negative until the next rollover folds it into `available`.
/// `balance()` is never negative for a consistent account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountState {
    available: i64,
    pending: i64,
    nonce_used: bool,
    last_roll_over: u64,
}

impl AccountState {
    /// State recovered from decrypted ledger ciphertexts: the nonce flag is
    /// cleared and the rollover marker pinned to the sync epoch.
    pub fn synchronized(available: u64, pending: u64, epoch: u64) -> Self {
        AccountState {
            available: available as i64,
            pending: pending as i64,
            nonce_used: false,
            last_roll_over: epoch,
        }
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn pending(&self) -> i64 {
        self.pending
    }

    pub fn nonce_used(&self) -> bool {
        self.nonce_used
    }

    pub fn last_roll_over(&self) -> u64 {
        self.last_roll_over
    }

    pub fn balance(&self) -> i64 {
        self.available + self.pending
    }

    /// Project this state to `epoch`. If a rollover boundary was crossed,
    /// `pending` folds into `available` and the per-epoch nonce resets.
    /// Pure, idempotent for a fixed `epoch`, and monotonic — the rollover
    /// marker never moves backwards.
    #[must_use]
    pub fn project(&self, epoch: u64) -> AccountState {
        let mut next = *self;
        if self.last_roll_over < epoch {
            next.available += next.pending;
            next.pending = 0;
            next.nonce_used = false;
            next.last_roll_over = epoch;
        }
        next
    }

    /// A confirmed deposit or incoming transfer.
    pub(crate) fn credit_pending(&mut self, delta: u64) {
        self.pending += delta as i64;
    }

    /// A confirmed outgoing burn or transfer. Requires a prior `project` at
    /// the current epoch; posts to `pending` and consumes the epoch nonce.
    pub(crate) fn debit(&mut self, value: u64) {
        self.pending -= value as i64;
        self.nonce_used = true;
    }
}

/// One key pair plus its local balance mirror; the authoritative local view
/// of one ledger-side account keyed by the serialized public key.
#[derive(Debug)]
pub struct Account {
    pub(crate) keypair: KeyPair,
    pub(crate) state: AccountState,
}

impl Account {
    pub fn new(keypair: KeyPair) -> Self {
        Account {
            keypair,
            state: AccountState::default(),
        }
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }
}
