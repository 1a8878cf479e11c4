//! Wall-clock to epoch-index conversion.
//!
//! The epoch length is read once from the ledger at client initialization and
//! never changes for the lifetime of a client instance. Epochs do not start
//! from zero — they are simply the timestamp divided by the epoch length, so
//! two clients with the same configuration agree on the index.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Copy, Debug)]
pub struct EpochClock {
    epoch_length: Duration,
}

impl EpochClock {
    pub fn new(epoch_length: Duration) -> Self {
        EpochClock { epoch_length }
    }

    pub fn epoch_length(&self) -> Duration {
        self.epoch_length
    }

    /// Epoch index for a unix-millisecond timestamp.
    pub fn epoch_at(&self, at_millis: u64) -> u64 {
        at_millis / self.epoch_length.as_millis() as u64
    }

    /// Epoch index for the current wall-clock time.
    pub fn current_epoch(&self) -> u64 {
        self.epoch_at(now_millis())
    }

    /// Time remaining until the next epoch boundary. Never zero: exactly on a
    /// boundary this is one full epoch, so a queued retry always makes
    /// progress into a new epoch.
    pub fn time_to_next_boundary(&self) -> Duration {
        let len = self.epoch_length.as_millis() as u64;
        Duration::from_millis(len - now_millis() % len)
    }
}
