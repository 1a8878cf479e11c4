//! In-memory ledger and proof service for the scenario tests.
//!
//! [`MockLedger`] implements the contract's homomorphic bookkeeping for real:
//! per-account `available`/`pending` ciphertexts with lazy rollover on
//! mutation, registration signature verification, per-epoch nonce tracking
//! and `TransferOccurred` event delivery at mining time. Only the proofs are
//! fake — [`MockProver`] hands back opaque bytes and counts invocations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use zether_primitives::{
    elgamal, encrypt, point_from_bytes, random_scalar, verify_registration, Ciphertext, Scalar,
    SerializedPoint,
};

use crate::epoch::now_millis;
use crate::ledger::{
    Address, AssetBacking, BurnCall, EncryptedAccountState, Ledger, LedgerError,
    SerializedCiphertext, TransferCall, TransferEvent, TxHash, TxReceipt,
};
use crate::prover::{BurnStatement, ProofError, ProofService, TransferStatement};

pub const CONTRACT: Address = [0xCC; 20];

#[derive(Clone, Copy)]
struct ContractAccount {
    available: Ciphertext,
    pending: Ciphertext,
    last_roll_over: u64,
}

impl ContractAccount {
    fn roll_over(&mut self, epoch: u64) {
        if self.last_roll_over < epoch {
            self.available = self.available.combine(&self.pending);
            self.pending = Ciphertext::zero();
            self.last_roll_over = epoch;
        }
    }

    /// Projection for reads, without mutating stored state.
    fn simulate(&self, epoch: u64) -> Ciphertext {
        if self.last_roll_over < epoch {
            self.available.combine(&self.pending)
        } else {
            self.available
        }
    }
}

enum Submitted {
    Register {
        key: SerializedPoint,
        challenge: [u8; 32],
        response: [u8; 32],
    },
    Approve,
    Fund {
        key: SerializedPoint,
        value: u64,
    },
    Burn(BurnCall),
    Transfer(TransferCall),
}

struct State {
    accounts: HashMap<SerializedPoint, ContractAccount>,
    registry: HashSet<[u8; 32]>,
    used_nonces: HashSet<SerializedPoint>,
    submitted: HashMap<TxHash, Submitted>,
    transfer_inputs: HashMap<TxHash, TransferCall>,
    block_timestamps: HashMap<u64, u64>,
    subscribers: Vec<mpsc::Sender<TransferEvent>>,
    next_tx: u64,
    next_block: u64,
    fail_next: Option<String>,
}

pub struct MockLedger {
    epoch_length: Duration,
    unit: u64,
    backing: AssetBacking,
    state: Mutex<State>,
    pub approvals: AtomicUsize,
}

impl MockLedger {
    pub fn new(epoch_length: Duration, unit: u64, backing: AssetBacking) -> Self {
        MockLedger {
            epoch_length,
            unit,
            backing,
            state: Mutex::new(State {
                accounts: HashMap::new(),
                registry: HashSet::new(),
                used_nonces: HashSet::new(),
                submitted: HashMap::new(),
                transfer_inputs: HashMap::new(),
                block_timestamps: HashMap::new(),
                subscribers: Vec::new(),
                next_tx: 0,
                next_block: 0,
                fail_next: None,
            }),
            approvals: AtomicUsize::new(0),
        }
    }

    /// Make the next mined transaction revert with `reason`.
    pub fn fail_next(&self, reason: &str) {
        self.state.lock().fail_next = Some(reason.to_string());
    }

    fn current_epoch(&self) -> u64 {
        now_millis() / self.epoch_length.as_millis() as u64
    }

    fn enqueue(&self, tx: Submitted) -> TxHash {
        let mut state = self.state.lock();
        state.next_tx += 1;
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&state.next_tx.to_le_bytes());
        state.submitted.insert(hash, tx);
        hash
    }

    fn mine(&self, state: &mut State, tx: Submitted, epoch: u64) -> Result<Vec<TransferEvent>, LedgerError> {
        match tx {
            Submitted::Register {
                key,
                challenge,
                response,
            } => {
                let public =
                    point_from_bytes(&key).map_err(|e| LedgerError::Reverted(e.to_string()))?;
                let c = scalar_from_bytes(&challenge)?;
                let s = scalar_from_bytes(&response)?;
                if !verify_registration(&CONTRACT, &public, &c, &s) {
                    return Err(LedgerError::Reverted("invalid registration signature".into()));
                }
                let hash = zether_primitives::public_key_hash(&public);
                if !state.registry.insert(hash) {
                    return Err(LedgerError::Reverted("account already registered".into()));
                }
                // Fresh accounts hold encryptions of zero, not the identity
                // ciphertext, so reads can tell "registered, empty" apart
                // from "unregistered".
                let mut rng = rand::rng();
                state.accounts.insert(
                    key,
                    ContractAccount {
                        available: encrypt(&Scalar::ZERO, &public, &random_scalar(&mut rng)),
                        pending: encrypt(&Scalar::ZERO, &public, &random_scalar(&mut rng)),
                        last_roll_over: epoch,
                    },
                );
                Ok(Vec::new())
            }
            Submitted::Approve => Ok(Vec::new()),
            Submitted::Fund { key, value } => {
                let account = state
                    .accounts
                    .get_mut(&key)
                    .ok_or_else(|| LedgerError::Reverted("fund of unregistered key".into()))?;
                account.roll_over(epoch);
                account.pending = elgamal::add_plain(&account.pending, value as i64);
                Ok(Vec::new())
            }
            Submitted::Burn(call) => {
                if !state.used_nonces.insert(call.u) {
                    return Err(LedgerError::Reverted("nonce already used".into()));
                }
                if call.proof.is_empty() {
                    return Err(LedgerError::Reverted("empty proof".into()));
                }
                let account = state
                    .accounts
                    .get_mut(&call.public_key)
                    .ok_or_else(|| LedgerError::Reverted("burn from unregistered key".into()))?;
                account.roll_over(epoch);
                account.pending = elgamal::add_plain(&account.pending, -(call.value as i64));
                Ok(Vec::new())
            }
            Submitted::Transfer(call) => {
                if !state.used_nonces.insert(call.u) {
                    return Err(LedgerError::Reverted("nonce already used".into()));
                }
                if call.proof.is_empty() {
                    return Err(LedgerError::Reverted("empty proof".into()));
                }
                if call.c.len() != call.parties.len() {
                    return Err(LedgerError::Reverted("delta/party arity mismatch".into()));
                }
                let d = point_from_bytes(&call.d)
                    .map_err(|e| LedgerError::Reverted(e.to_string()))?;
                for (party, left) in call.parties.iter().zip(&call.c) {
                    let left = point_from_bytes(left)
                        .map_err(|e| LedgerError::Reverted(e.to_string()))?;
                    let account = state.accounts.get_mut(party).ok_or_else(|| {
                        LedgerError::Reverted("transfer touches unregistered key".into())
                    })?;
                    account.roll_over(epoch);
                    account.pending = account
                        .pending
                        .combine(&Ciphertext { left, right: d });
                }
                Ok(vec![TransferEvent {
                    tx_hash: [0u8; 32], // filled in by the caller
                    block_number: 0,
                    parties: call.parties.clone(),
                }])
            }
        }
    }
}

fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar, LedgerError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
        .ok_or_else(|| LedgerError::Reverted("non-canonical scalar".into()))
}

#[async_trait]
impl Ledger for MockLedger {
    async fn epoch_length(&self) -> Result<Duration, LedgerError> {
        Ok(self.epoch_length)
    }

    async fn unit(&self) -> Result<u64, LedgerError> {
        Ok(self.unit)
    }

    async fn backing(&self) -> Result<AssetBacking, LedgerError> {
        Ok(self.backing)
    }

    async fn contract_address(&self) -> Result<Address, LedgerError> {
        Ok(CONTRACT)
    }

    async fn registered(&self, public_key_hash: [u8; 32]) -> Result<bool, LedgerError> {
        Ok(self.state.lock().registry.contains(&public_key_hash))
    }

    async fn get_balance(
        &self,
        keys: &[SerializedPoint],
        epoch: u64,
    ) -> Result<Vec<SerializedCiphertext>, LedgerError> {
        let state = self.state.lock();
        Ok(keys
            .iter()
            .map(|key| match state.accounts.get(key) {
                Some(account) => account.simulate(epoch).to_bytes(),
                None => Ciphertext::zero().to_bytes(),
            })
            .collect())
    }

    async fn get_account_state(
        &self,
        key: SerializedPoint,
    ) -> Result<EncryptedAccountState, LedgerError> {
        let state = self.state.lock();
        let account = state
            .accounts
            .get(&key)
            .ok_or_else(|| LedgerError::Call("no such account".into()))?;
        Ok(EncryptedAccountState {
            available: account.available.to_bytes(),
            pending: account.pending.to_bytes(),
        })
    }

    async fn submit_register(
        &self,
        _from: Address,
        key: SerializedPoint,
        challenge: [u8; 32],
        response: [u8; 32],
    ) -> Result<TxHash, LedgerError> {
        Ok(self.enqueue(Submitted::Register {
            key,
            challenge,
            response,
        }))
    }

    async fn approve(&self, _from: Address, _amount: u128) -> Result<TxHash, LedgerError> {
        self.approvals.fetch_add(1, Ordering::SeqCst);
        Ok(self.enqueue(Submitted::Approve))
    }

    async fn submit_fund(
        &self,
        _from: Address,
        key: SerializedPoint,
        value: u64,
    ) -> Result<TxHash, LedgerError> {
        Ok(self.enqueue(Submitted::Fund { key, value }))
    }

    async fn submit_burn(&self, _from: Address, call: BurnCall) -> Result<TxHash, LedgerError> {
        Ok(self.enqueue(Submitted::Burn(call)))
    }

    async fn submit_transfer(
        &self,
        _from: Address,
        call: TransferCall,
    ) -> Result<TxHash, LedgerError> {
        let hash = self.enqueue(Submitted::Transfer(call.clone()));
        self.state.lock().transfer_inputs.insert(hash, call);
        Ok(hash)
    }

    async fn wait_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, LedgerError> {
        let epoch = self.current_epoch();
        let (receipt, events, subscribers) = {
            let mut state = self.state.lock();
            let tx = state
                .submitted
                .remove(&tx_hash)
                .ok_or_else(|| LedgerError::UnknownTransaction(hex::encode(tx_hash)))?;
            if let Some(reason) = state.fail_next.take() {
                state.transfer_inputs.remove(&tx_hash);
                return Err(LedgerError::Reverted(reason));
            }
            let mut events = self.mine(&mut state, tx, epoch)?;
            state.next_block += 1;
            let block_number = state.next_block;
            state.block_timestamps.insert(block_number, now_millis());
            for event in &mut events {
                event.tx_hash = tx_hash;
                event.block_number = block_number;
            }
            (
                TxReceipt {
                    tx_hash,
                    block_number,
                },
                events,
                state.subscribers.clone(),
            )
        };
        for event in events {
            for subscriber in &subscribers {
                let _ = subscriber.send(event.clone()).await;
            }
        }
        Ok(receipt)
    }

    async fn subscribe_transfers(&self) -> Result<mpsc::Receiver<TransferEvent>, LedgerError> {
        let (tx, rx) = mpsc::channel(64);
        self.state.lock().subscribers.push(tx);
        Ok(rx)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, LedgerError> {
        self.state
            .lock()
            .block_timestamps
            .get(&block_number)
            .copied()
            .ok_or_else(|| LedgerError::Call(format!("unknown block {block_number}")))
    }

    async fn transfer_input(&self, tx_hash: TxHash) -> Result<TransferCall, LedgerError> {
        self.state
            .lock()
            .transfer_inputs
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownTransaction(hex::encode(tx_hash)))
    }
}

#[derive(Default)]
pub struct MockProver {
    pub burns: AtomicUsize,
    pub transfers: AtomicUsize,
}

impl ProofService for MockProver {
    fn prove_burn(&self, statement: &BurnStatement) -> Result<Vec<u8>, ProofError> {
        if statement.new_balance.is_zero() {
            return Err(ProofError::Malformed("identity balance ciphertext"));
        }
        self.burns.fetch_add(1, Ordering::SeqCst);
        Ok(b"mock-burn-proof".to_vec())
    }

    fn prove_transfer(&self, statement: &TransferStatement) -> Result<Vec<u8>, ProofError> {
        if statement.anonymity_set.len() != statement.new_balances.len()
            || statement.anonymity_set.len() != statement.delta_left.len()
        {
            return Err(ProofError::Malformed("statement arity mismatch"));
        }
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(b"mock-transfer-proof".to_vec())
    }
}
