//! Optimistic read-modify-write for records.
//!
//! Every operation reads, applies a caller transform to a [`Record`] and
//! attempts one conditional write. Losing a race is reported as a value, never
//! as an error, so callers decide whether to retry. [`RecordStore::spin_until_success`]
//! is the retrying variant.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::backend::Connector;
use crate::connection::{CasOutcome, validate_key};
use crate::error::StoreResult;
use crate::record::{Record, Schema};
use crate::retry::RetryPolicy;
use crate::store::RecordStore;

/// Outcome of a write that creates the record when it is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Another writer got there first; nothing was written.
    Conflict,
    Success,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpinOutcome {
    Success { attempts: u32 },
    /// The retry budget ran out while every attempt conflicted.
    Exhausted { attempts: u32 },
}

impl SpinOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SpinOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SpinOutcome::Success { attempts } | SpinOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

impl<T: Schema, C: Connector> RecordStore<T, C> {
    /// Loads the record stored under `id`, applies `transform` once and writes
    /// the result if nobody else wrote in between.
    pub fn conditional_update<F>(
        &self,
        id: &str,
        ttl: Option<u32>,
        transform: F,
    ) -> StoreResult<CasOutcome>
    where
        F: FnOnce(&mut Record<T>),
    {
        validate_key(id)?;
        let connection = self.connection()?;
        let ttl = Self::ttl_or_default(&connection, ttl);
        connection.cas(id, ttl, |stored| {
            let mut record = Record::<T>::from_value(stored)?;
            record.id = Some(id.to_string());
            transform(&mut record);
            record.to_value()
        })
    }

    /// Like [`conditional_update`](Self::conditional_update), creating the
    /// record when none is stored. The transform runs at most once.
    pub fn conditional_update_or_create<F>(
        &self,
        id: &str,
        ttl: Option<u32>,
        transform: F,
    ) -> StoreResult<WriteOutcome>
    where
        F: FnOnce(&mut Record<T>),
    {
        let mut pending = Some(transform);
        let outcome = self.conditional_update(id, ttl, |record| {
            if let Some(transform) = pending.take() {
                transform(record);
            }
        })?;
        match outcome {
            CasOutcome::Success => Ok(WriteOutcome::Success),
            CasOutcome::Conflict => Ok(WriteOutcome::Conflict),
            CasOutcome::NotFound => match pending.take() {
                Some(transform) => self.create_if_absent(id, ttl, transform),
                None => Ok(WriteOutcome::Conflict),
            },
        }
    }

    /// Builds a record holding only `id`, applies `transform` and stores it if
    /// the key is still free. On `Conflict` the transformed record is dropped.
    pub fn create_if_absent<F>(
        &self,
        id: &str,
        ttl: Option<u32>,
        transform: F,
    ) -> StoreResult<WriteOutcome>
    where
        F: FnOnce(&mut Record<T>),
    {
        validate_key(id)?;
        let connection = self.connection()?;
        let ttl = Self::ttl_or_default(&connection, ttl);

        let mut record = Record::<T>::with_id(id);
        transform(&mut record);
        if connection.add(id, &record.to_value()?, ttl)? {
            Ok(WriteOutcome::Success)
        } else {
            debug!(schema = T::NAME, id, "create lost the race");
            Ok(WriteOutcome::Conflict)
        }
    }

    /// Repeats [`conditional_update_or_create`](Self::conditional_update_or_create)
    /// under the store's retry policy. The transform runs once per attempt.
    pub fn spin_until_success<F>(
        &self,
        id: &str,
        ttl: Option<u32>,
        transform: F,
    ) -> StoreResult<SpinOutcome>
    where
        F: FnMut(&mut Record<T>),
    {
        let policy = self.retry_policy().clone();
        self.spin_until_success_with(&policy, id, ttl, transform)
    }

    pub fn spin_until_success_with<F>(
        &self,
        policy: &RetryPolicy,
        id: &str,
        ttl: Option<u32>,
        mut transform: F,
    ) -> StoreResult<SpinOutcome>
    where
        F: FnMut(&mut Record<T>),
    {
        validate_key(id)?;
        let jitter_seed = jitter_seed();
        let mut attempt = 0u32;
        loop {
            attempt = next_attempt(attempt);
            if self.conditional_update_or_create(id, ttl, &mut transform)? == WriteOutcome::Success {
                if attempt > 1 {
                    debug!(schema = T::NAME, id, attempts = attempt, "contended update landed");
                }
                return Ok(SpinOutcome::Success { attempts: attempt });
            }
            if !policy.allows_another(attempt) {
                warn!(schema = T::NAME, id, attempts = attempt, "retry budget exhausted");
                return Ok(SpinOutcome::Exhausted { attempts: attempt });
            }

            let delay = policy.delay_after(attempt, jitter_seed);
            debug!(
                schema = T::NAME,
                id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "update conflicted, retrying"
            );
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }
}

/// Attempt counters stop at `u32::MAX` under unbounded policies.
fn next_attempt(attempt: u32) -> u32 {
    attempt.saturating_add(1)
}

fn jitter_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos() as u64 ^ elapsed.as_secs())
        .unwrap_or_default()
}
