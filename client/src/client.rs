//! The confidential account client: registration, deposits, withdrawals and
//! anonymity-set transfers against a [`Ledger`], with proofs produced by an
//! external [`ProofService`].
//!
//! ## Queueing discipline
//!
//! Withdrawals and transfers are gated on the projected local state. Three
//! conditions queue the call instead of failing it: the amount still sits in
//! `pending` (not rolled over yet), the per-epoch nonce was already consumed,
//! or too little time remains in the epoch for the transaction to be mined
//! before rollover (a proof built against epoch `N` is rejected once the
//! contract rolls into `N + 1`). A queued call sleeps until the next epoch
//! boundary and retries with identical arguments; progress is reported via
//! `log`, never through the result type.
//!
//! ## Incoming transfers
//!
//! A standing subscription to the ledger's `TransferOccurred` stream feeds a
//! per-client pump task. Echoes of this client's own transfers are recognized
//! through the pending-transfer set and dropped; genuine incoming transfers
//! are decoded at this client's anonymity-set position, decrypted, and
//! credited to `pending` — no contract polling on the receiving side.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use zether_primitives::{
    decrypt, elgamal, encrypt, epoch_nonce, point_from_bytes, point_to_bytes, public_key_hash,
    random_scalar, sign_registration, signed_scalar, Ciphertext, ElGamalError, KeyPair, Point,
    SerializedPoint, MAX_PLAIN,
};

use crate::account::{Account, AccountState};
use crate::epoch::EpochClock;
use crate::ledger::{
    Address, AssetBacking, BurnCall, Ledger, LedgerError, TransferCall, TransferEvent, TxReceipt,
};
use crate::prover::{BurnStatement, ProofError, ProofService, TransferStatement};

/// Anonymity-set size: sender and receiver.
const ANONYMITY_SIZE: usize = 2;

#[derive(Debug, Error)]
pub enum Error {
    #[error("account not registered: call register() first")]
    NotRegistered,
    #[error("invalid value {0}: must be within (0, 2^32 - 1]")]
    InvalidValue(u64),
    #[error("requested amount {requested} exceeds account balance {balance}")]
    InsufficientBalance { requested: u64, balance: i64 },
    #[error("sending to yourself is unsupported")]
    SelfTransfer,
    #[error("receiver has not been registered")]
    ReceiverNotRegistered,
    #[error("anonymity set member has no ledger entry")]
    UnregisteredParty,
    #[error(
        "estimated proving time {estimated:?} exceeds the epoch length {epoch_length:?}; \
         redeploy with a longer epoch"
    )]
    EpochTooShort {
        estimated: Duration,
        epoch_length: Duration,
    },
    #[error(transparent)]
    Decryption(#[from] ElGamalError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Proof(#[from] ProofError),
}

/// Timing parameters of the queueing discipline. The defaults are calibrated
/// against the reference deployment; deployments with very different block
/// times or provers should re-measure.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Expected block-inclusion time. A burn submitted with less than this
    /// remaining in the epoch risks being mined after rollover.
    pub block_margin: Duration,
    /// Fixed proving overhead per transfer.
    pub prove_base: Duration,
    /// Proving cost multiplied by `N · log2(N)` for an anonymity set of `N`.
    pub prove_unit: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_margin: Duration::from_millis(3100),
            prove_base: Duration::from_millis(5200),
            prove_unit: Duration::from_millis(20),
        }
    }
}

#[derive(Default)]
struct Shared {
    account: Option<Account>,
    /// Self-submitted transfer hashes awaiting their event echo.
    pending_transfers: HashSet<crate::ledger::TxHash>,
}

enum Gate {
    Ready { state: AccountState, wait: Duration },
    Queued { wait: Duration, reason: &'static str },
}

/// Client for one confidential account. Operations on a single client must
/// not race each other (the local nonce/pending bookkeeping assumes one
/// in-flight mutation); clients for different accounts are independent.
pub struct ConfidentialClient<L, P> {
    ledger: Arc<L>,
    prover: Arc<P>,
    home: Address,
    contract: Address,
    clock: EpochClock,
    unit: u64,
    backing: AssetBacking,
    config: Config,
    shared: Arc<Mutex<Shared>>,
}

impl<L: Ledger, P: ProofService> ConfidentialClient<L, P> {
    pub async fn init(ledger: Arc<L>, prover: Arc<P>, home: Address) -> Result<Self, Error> {
        Self::init_with_config(ledger, prover, home, Config::default()).await
    }

    /// Read the immutable deployment parameters, spawn the event pump, and
    /// return a ready client. No account exists until [`Self::register`].
    pub async fn init_with_config(
        ledger: Arc<L>,
        prover: Arc<P>,
        home: Address,
        config: Config,
    ) -> Result<Self, Error> {
        let epoch_length = ledger.epoch_length().await?;
        let unit = ledger.unit().await?;
        let backing = ledger.backing().await?;
        let contract = ledger.contract_address().await?;
        let clock = EpochClock::new(epoch_length);

        let shared = Arc::new(Mutex::new(Shared::default()));
        let events = ledger.subscribe_transfers().await?;
        tokio::spawn(event_pump(
            Arc::clone(&ledger),
            Arc::clone(&shared),
            clock,
            events,
        ));

        log::info!(
            "client initialized: contract {}, epoch length {:?}, unit {}",
            hex::encode(contract),
            epoch_length,
            unit
        );
        Ok(ConfidentialClient {
            ledger,
            prover,
            home,
            contract,
            clock,
            unit,
            backing,
            config,
            shared,
        })
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    /// Serialized public key of the registered account.
    pub fn public_key(&self) -> Result<SerializedPoint, Error> {
        Ok(self.require_keypair()?.public_serialized())
    }

    /// The client's current local view of its balance. May lag the ledger
    /// until the next event or sync.
    pub fn local_balance(&self) -> Result<i64, Error> {
        let guard = self.shared.lock();
        let account = guard.account.as_ref().ok_or(Error::NotRegistered)?;
        Ok(account.state.balance())
    }

    fn require_keypair(&self) -> Result<KeyPair, Error> {
        let guard = self.shared.lock();
        let account = guard.account.as_ref().ok_or(Error::NotRegistered)?;
        Ok(account.keypair.clone())
    }

    fn check_value(value: u64) -> Result<(), Error> {
        if value == 0 || value > MAX_PLAIN {
            return Err(Error::InvalidValue(value));
        }
        Ok(())
    }

    /// Register a key pair for this client.
    ///
    /// With a `secret`, the pair is derived deterministically; if its hash is
    /// already in the registry this is an account recovery and the local
    /// state is synchronized from the ledger instead of re-registering.
    /// Without a `secret` a fresh pair is generated. A failed registration
    /// transaction discards the tentative key pair — no partial state
    /// persists.
    pub async fn register(&self, secret: Option<&[u8]>) -> Result<(), Error> {
        let keypair = match secret {
            Some(seed) => KeyPair::from_seed(seed),
            None => {
                let mut rng = rand::rng();
                KeyPair::random(&mut rng)
            }
        };

        if self
            .ledger
            .registered(public_key_hash(keypair.public()))
            .await?
        {
            log::info!("public key already registered, recovering account state");
            self.shared.lock().account = Some(Account::new(keypair));
            return self.sync_account_state().await;
        }

        let (challenge, response) = {
            let mut rng = rand::rng();
            sign_registration(&self.contract, &keypair, &mut rng)
        };
        let tx_hash = self
            .ledger
            .submit_register(
                self.home,
                keypair.public_serialized(),
                challenge.to_bytes(),
                response.to_bytes(),
            )
            .await?;
        log::info!("registration submitted (tx {})", hex::encode(tx_hash));

        // Keypair is only installed on a confirmed receipt.
        self.ledger.wait_receipt(tx_hash).await?;
        self.shared.lock().account = Some(Account::new(keypair));
        log::info!("registration successful");
        Ok(())
    }

    /// Decrypt the ledger's balance ciphertext projected to the next epoch
    /// (which already reflects this epoch's rollover). Local state is not
    /// touched.
    pub async fn read_balance_from_contract(&self) -> Result<u64, Error> {
        let keypair = self.require_keypair()?;
        let epoch = self.clock.current_epoch();
        let ciphertexts = self
            .ledger
            .get_balance(&[keypair.public_serialized()], epoch + 1)
            .await?;
        let raw = ciphertexts
            .first()
            .ok_or_else(|| LedgerError::Call("empty balance response".into()))?;
        let balance = decrypt(&Ciphertext::from_bytes(raw)?, keypair.secret())?;
        log::info!("read balance from contract: {balance}");
        Ok(balance)
    }

    /// Overwrite the local state from the ledger's published ciphertexts.
    /// Use after account recovery, or whenever local tracking is believed
    /// stale.
    pub async fn sync_account_state(&self) -> Result<(), Error> {
        let keypair = self.require_keypair()?;
        let encrypted = self
            .ledger
            .get_account_state(keypair.public_serialized())
            .await?;
        let available = decrypt(
            &Ciphertext::from_bytes(&encrypted.available)?,
            keypair.secret(),
        )?;
        let pending = decrypt(
            &Ciphertext::from_bytes(&encrypted.pending)?,
            keypair.secret(),
        )?;
        let epoch = self.clock.current_epoch();
        {
            let mut guard = self.shared.lock();
            if let Some(account) = guard.account.as_mut() {
                account.state = AccountState::synchronized(available, pending, epoch);
            }
        }
        log::info!("account synchronized: available = {available}, pending = {pending}");
        Ok(())
    }

    /// Convert `value` units of the public asset into confidential balance.
    /// Token-backed deployments grant the contract an allowance first.
    pub async fn deposit(&self, value: u64) -> Result<TxReceipt, Error> {
        let keypair = self.require_keypair()?;
        Self::check_value(value)?;
        let base_amount = u128::from(value) * u128::from(self.unit);
        log::info!("initiating deposit: {value} units ({base_amount} base tokens)");

        if self.backing == AssetBacking::Token {
            let tx_hash = self.ledger.approve(self.home, base_amount).await?;
            self.ledger.wait_receipt(tx_hash).await?;
            log::info!("token allowance approved, funding");
        }

        let tx_hash = self
            .ledger
            .submit_fund(self.home, keypair.public_serialized(), value)
            .await?;
        log::info!("deposit submitted (tx {})", hex::encode(tx_hash));
        let receipt = self.ledger.wait_receipt(tx_hash).await?;

        let mut guard = self.shared.lock();
        if let Some(account) = guard.account.as_mut() {
            account.state = account.state.project(self.clock.current_epoch());
            account.state.credit_pending(value);
            log::info!(
                "deposit of {value} successful, balance now {}",
                account.state.balance()
            );
        }
        Ok(receipt)
    }

    /// Convert `value` units of confidential balance back to the public
    /// asset. Queues across epoch boundaries as described in the module
    /// docs; fails fast when `value` exceeds the total balance.
    pub async fn withdraw(&self, value: u64) -> Result<TxReceipt, Error> {
        self.require_keypair()?;
        Self::check_value(value)?;
        loop {
            let state = match self.gate(value)? {
                Gate::Queued { wait, reason } => {
                    log::info!("withdrawal queued ({reason}); retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Gate::Ready { state, wait } => {
                    if self.config.block_margin > wait {
                        log::info!(
                            "withdrawal queued (only {wait:?} left in epoch, below the \
                             {:?} inclusion margin)",
                            self.config.block_margin
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    state
                }
            };
            return self.withdraw_at(state, value).await;
        }
    }

    async fn withdraw_at(&self, state: AccountState, value: u64) -> Result<TxReceipt, Error> {
        let keypair = self.require_keypair()?;
        let epoch = state.last_roll_over();

        let ciphertexts = self
            .ledger
            .get_balance(&[keypair.public_serialized()], epoch)
            .await?;
        let raw = ciphertexts
            .first()
            .ok_or_else(|| LedgerError::Call("empty balance response".into()))?;
        let balance = Ciphertext::from_bytes(raw)?;
        let new_balance = elgamal::sub_plain(&balance, value as i64);

        let proof = self.prover.prove_burn(&BurnStatement {
            new_balance,
            public_key: *keypair.public(),
            epoch,
            sender: self.home,
            secret_key: *keypair.secret(),
            remaining_balance: (state.available() - value as i64) as u64,
        })?;
        let u = epoch_nonce(epoch, keypair.secret());

        let tx_hash = self
            .ledger
            .submit_burn(
                self.home,
                BurnCall {
                    public_key: keypair.public_serialized(),
                    value,
                    u: point_to_bytes(&u),
                    proof,
                },
            )
            .await?;
        log::info!("withdrawal submitted (tx {})", hex::encode(tx_hash));
        let receipt = self.ledger.wait_receipt(tx_hash).await?;
        self.commit_debit("withdrawal", value);
        Ok(receipt)
    }

    /// Transfer `value` units to a registered receiver behind a two-member
    /// anonymity set. Queues exactly like [`Self::withdraw`], with the
    /// proving-time estimate in place of the block margin.
    pub async fn transfer(
        &self,
        receiver: SerializedPoint,
        value: u64,
    ) -> Result<TxReceipt, Error> {
        self.require_keypair()?;
        Self::check_value(value)?;

        let receiver_point = point_from_bytes(&receiver)?;
        if !self
            .ledger
            .registered(public_key_hash(&receiver_point))
            .await?
        {
            return Err(Error::ReceiverNotRegistered);
        }

        let estimated = self.estimated_prove_time();
        if estimated > self.clock.epoch_length() {
            return Err(Error::EpochTooShort {
                estimated,
                epoch_length: self.clock.epoch_length(),
            });
        }

        loop {
            let state = match self.gate(value)? {
                Gate::Queued { wait, reason } => {
                    log::info!("transfer queued ({reason}); retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Gate::Ready { state, wait } => {
                    if estimated > wait {
                        log::info!(
                            "transfer queued (proof needs ~{estimated:?} but only {wait:?} \
                             left in epoch)"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    state
                }
            };
            let keypair = self.require_keypair()?;
            if receiver_point == *keypair.public() {
                return Err(Error::SelfTransfer);
            }
            return self
                .transfer_at(&keypair, state, receiver_point, value)
                .await;
        }
    }

    /// Convenience alias: transfer to another client's registered key.
    pub async fn transfer_to_account(&self, peer: &Self, value: u64) -> Result<TxReceipt, Error> {
        self.transfer(peer.public_key()?, value).await
    }

    async fn transfer_at(
        &self,
        keypair: &KeyPair,
        state: AccountState,
        receiver: Point,
        value: u64,
    ) -> Result<TxReceipt, Error> {
        let epoch = state.last_roll_over();

        // Uniformly random position order, so on-chain position reveals
        // nothing about who sent and who received.
        let mut set = vec![*keypair.public(), receiver];
        let mut index = [0usize, 1usize];
        let r = {
            let mut rng = rand::rng();
            if rand::Rng::random::<bool>(&mut rng) {
                set.swap(0, 1);
                index.swap(0, 1);
            }
            random_scalar(&mut rng)
        };

        let serialized: Vec<SerializedPoint> = set.iter().map(point_to_bytes).collect();
        let fetched = self.ledger.get_balance(&serialized, epoch).await?;
        let mut balances = Vec::with_capacity(fetched.len());
        for raw in &fetched {
            balances.push(Ciphertext::from_bytes(raw)?);
        }
        if balances.iter().any(Ciphertext::is_zero) {
            return Err(Error::UnregisteredParty);
        }

        // One shared randomness across both deltas: the proof shows they sum
        // to zero without revealing which position is which.
        let mut deltas = [Ciphertext::zero(); ANONYMITY_SIZE];
        deltas[index[0]] = encrypt(&signed_scalar(-(value as i64)), &set[index[0]], &r);
        deltas[index[1]] = encrypt(&signed_scalar(value as i64), &set[index[1]], &r);

        let delta_left: Vec<Point> = deltas.iter().map(|ct| ct.left).collect();
        let delta_right = deltas[0].right;
        let new_balances: Vec<Ciphertext> = balances
            .iter()
            .zip(&delta_left)
            .map(|(ct, left)| Ciphertext {
                left: ct.left + left,
                right: ct.right + delta_right,
            })
            .collect();

        let proof = self.prover.prove_transfer(&TransferStatement {
            new_balances,
            delta_left: delta_left.clone(),
            delta_right,
            anonymity_set: set,
            epoch,
            secret_key: *keypair.secret(),
            randomness: r,
            value,
            remaining_balance: (state.available() - value as i64) as u64,
            index,
        })?;
        let u = epoch_nonce(epoch, keypair.secret());

        let tx_hash = self
            .ledger
            .submit_transfer(
                self.home,
                TransferCall {
                    c: delta_left.iter().map(point_to_bytes).collect(),
                    d: point_to_bytes(&delta_right),
                    parties: serialized,
                    u: point_to_bytes(&u),
                    proof,
                },
            )
            .await?;
        // Must be recorded before the mined event can echo back.
        self.shared.lock().pending_transfers.insert(tx_hash);
        log::info!("transfer submitted (tx {})", hex::encode(tx_hash));

        let receipt = self.ledger.wait_receipt(tx_hash).await?;
        self.commit_debit("transfer", value);
        Ok(receipt)
    }

    /// Shared eligibility gate for withdraw/transfer: project to the current
    /// epoch, fail on over-balance, queue on pending funds or a consumed
    /// nonce.
    fn gate(&self, value: u64) -> Result<Gate, Error> {
        let guard = self.shared.lock();
        let account = guard.account.as_ref().ok_or(Error::NotRegistered)?;
        let state = account.state.project(self.clock.current_epoch());

        if value as i64 > state.balance() {
            return Err(Error::InsufficientBalance {
                requested: value,
                balance: state.balance(),
            });
        }
        let wait = self.clock.time_to_next_boundary();
        if value as i64 > state.available() {
            return Ok(Gate::Queued {
                wait,
                reason: "waiting for pending funds to roll over",
            });
        }
        if state.nonce_used() {
            return Ok(Gate::Queued {
                wait,
                reason: "per-epoch nonce already used",
            });
        }
        Ok(Gate::Ready { state, wait })
    }

    fn commit_debit(&self, operation: &str, value: u64) {
        let mut guard = self.shared.lock();
        if let Some(account) = guard.account.as_mut() {
            account.state = account.state.project(self.clock.current_epoch());
            account.state.debit(value);
            log::info!(
                "{operation} of {value} successful, balance now {}",
                account.state.balance()
            );
        }
    }

    fn estimated_prove_time(&self) -> Duration {
        let n = ANONYMITY_SIZE as f64;
        let millis = (n * n.log2() * self.config.prove_unit.as_millis() as f64
            + self.config.prove_base.as_millis() as f64)
            .ceil() as u64;
        Duration::from_millis(millis)
    }

    #[cfg(test)]
    pub(crate) fn pending_transfer_count(&self) -> usize {
        self.shared.lock().pending_transfers.len()
    }
}

async fn event_pump<L: Ledger>(
    ledger: Arc<L>,
    shared: Arc<Mutex<Shared>>,
    clock: EpochClock,
    mut events: mpsc::Receiver<TransferEvent>,
) {
    while let Some(event) = events.recv().await {
        if let Err(err) = handle_transfer_event(&*ledger, &shared, &clock, event).await {
            log::warn!("transfer event handling failed: {err}");
        }
    }
    log::debug!("transfer event stream closed");
}

async fn handle_transfer_event<L: Ledger>(
    ledger: &L,
    shared: &Mutex<Shared>,
    clock: &EpochClock,
    event: TransferEvent,
) -> Result<(), Error> {
    log::debug!("TransferOccurred event (tx {})", hex::encode(event.tx_hash));

    let (keypair, position) = {
        let mut guard = shared.lock();
        if guard.pending_transfers.remove(&event.tx_hash) {
            // Echo of our own transfer; the sender side already committed at
            // submission confirmation.
            return Ok(());
        }
        let Some(account) = guard.account.as_ref() else {
            return Ok(());
        };
        let own = account.keypair().public_serialized();
        let Some(position) = event.parties.iter().position(|party| *party == own) else {
            return Ok(());
        };
        (account.keypair().clone(), position)
    };

    let timestamp = ledger.block_timestamp(event.block_number).await?;
    let input = ledger.transfer_input(event.tx_hash).await?;
    let left = input
        .c
        .get(position)
        .ok_or_else(|| LedgerError::Call("transfer input shorter than anonymity set".into()))?;
    let delta = Ciphertext {
        left: point_from_bytes(left)?,
        right: point_from_bytes(&input.d)?,
    };
    let value = decrypt(&delta, keypair.secret())?;

    let mut guard = shared.lock();
    if let Some(account) = guard.account.as_mut() {
        account.state = account.state.project(clock.epoch_at(timestamp));
        if value > 0 {
            account.state.credit_pending(value);
            log::info!(
                "transfer of {value} received, balance now {}",
                account.state.balance()
            );
        }
    }
    Ok(())
}
