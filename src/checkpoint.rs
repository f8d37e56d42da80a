//! Job checkpoints, cached blobs and leases.
//!
//! Everything here is stored as JSON in a [`KvStore`]. Expiry is advisory:
//! an expired entry reads as absent and is deleted on the way out, but the
//! runner never relies on expiry to clear state it has consumed.

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::JobKey;
use crate::store::kv::KvStore;

/// Persisted remainder of a suspended job.
///
/// List jobs store the unprocessed `remaining` items; cursor jobs store the
/// offset of the next item instead. Both empty is the completion marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<T> {
    pub remaining: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    pub written_at: DateTime<Utc>,
}

impl<T> Checkpoint<T> {
    pub fn items(remaining: Vec<T>, written_at: DateTime<Utc>) -> Self {
        Self {
            remaining,
            cursor: None,
            written_at,
        }
    }

    pub fn at_cursor(cursor: usize, written_at: DateTime<Utc>) -> Self {
        Self {
            remaining: Vec::new(),
            cursor: Some(cursor),
            written_at,
        }
    }

    pub fn complete(written_at: DateTime<Utc>) -> Self {
        Self {
            remaining: Vec::new(),
            cursor: None,
            written_at,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty() && self.cursor.is_none()
    }
}

/// What a job key's checkpoint slot says about its last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStatus {
    /// Nothing stored.
    NeverRan,
    /// Completion marker present.
    Finished,
    /// Items left to process, or the cursor offset for cursor jobs.
    Pending(usize),
}

/// Keyed JSON blob storage with TTLs, over an injected clock.
pub struct CheckpointStore<'a> {
    kv: &'a dyn KvStore,
    clock: &'a dyn Clock,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(kv: &'a dyn KvStore, clock: &'a dyn Clock) -> Self {
        Self { kv, clock }
    }

    pub fn put(&self, key: &str, value: &str, ttl: Option<TimeDelta>) -> Result<()> {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        self.kv.put(key, value, expires_at)
    }

    /// Live value for `key`. Expired entries are deleted and read as absent.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(entry) = self.kv.get(key)? else {
            return Ok(None);
        };
        if entry.is_live(self.clock.now()) {
            Ok(Some(entry.value))
        } else {
            debug!(key, "dropping expired entry");
            self.kv.delete(key)?;
            Ok(None)
        }
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.kv.delete(key)
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    pub fn save_checkpoint<T: Serialize>(
        &self,
        key: &JobKey,
        checkpoint: &Checkpoint<T>,
        ttl: TimeDelta,
    ) -> Result<()> {
        let json = serde_json::to_string(checkpoint)?;
        self.put(&key.to_string(), &json, Some(ttl))
    }

    /// Read and clear the checkpoint. A completion marker is cleared too but
    /// reported as nothing to resume.
    pub fn take_checkpoint<T: DeserializeOwned>(
        &self,
        key: &JobKey,
    ) -> Result<Option<Checkpoint<T>>> {
        let slot = key.to_string();
        let Some(json) = self.get(&slot)? else {
            return Ok(None);
        };
        self.kv.delete(&slot)?;
        let checkpoint: Checkpoint<T> = serde_json::from_str(&json)?;
        Ok((!checkpoint.is_complete()).then_some(checkpoint))
    }

    /// Write the empty completion marker.
    pub fn mark_complete(&self, key: &JobKey, ttl: TimeDelta) -> Result<()> {
        let marker = Checkpoint::<serde_json::Value>::complete(self.clock.now());
        self.save_checkpoint(key, &marker, ttl)
    }

    pub fn status(&self, key: &JobKey) -> Result<ResumeStatus> {
        let Some(json) = self.get(&key.to_string())? else {
            return Ok(ResumeStatus::NeverRan);
        };
        let checkpoint: Checkpoint<serde_json::Value> = serde_json::from_str(&json)?;
        Ok(match checkpoint.cursor {
            Some(cursor) => ResumeStatus::Pending(cursor),
            None if checkpoint.remaining.is_empty() => ResumeStatus::Finished,
            None => ResumeStatus::Pending(checkpoint.remaining.len()),
        })
    }

    // -----------------------------------------------------------------------
    // Cached intermediate results
    // -----------------------------------------------------------------------

    pub fn cache_blob<T: Serialize + ?Sized>(
        &self,
        key: &JobKey,
        name: &str,
        value: &T,
        ttl: TimeDelta,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.put(&key.blob_key(name), &json, Some(ttl))
    }

    pub fn load_blob<T: DeserializeOwned>(&self, key: &JobKey, name: &str) -> Result<Option<T>> {
        self.get(&key.blob_key(name))?
            .map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    pub fn drop_blob(&self, key: &JobKey, name: &str) -> Result<()> {
        self.kv.delete(&key.blob_key(name))
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Claim exclusive ownership of `key` for `ttl`. Fails with a conflict
    /// while another owner's lease is live; the same owner may renew.
    pub fn acquire_lease(&self, key: &JobKey, owner: Uuid, ttl: TimeDelta) -> Result<Lease<'a>> {
        let now = self.clock.now();
        let slot = key.lease_key();
        let blocked = self
            .kv
            .put_unless_live(&slot, &owner.to_string(), Some(now + ttl), now)?;
        if let Some(held) = blocked {
            return Err(Error::LeaseHeld {
                key: key.to_string(),
                owner: held.value,
                until: held.expires_at.unwrap_or(now),
            });
        }
        debug!(key = %key, %owner, "lease acquired");
        Ok(Lease {
            kv: self.kv,
            slot,
            owner,
        })
    }

    /// Push a held lease's expiry out to `ttl` from now. Fails with a
    /// conflict if the lease lapsed and another owner took it.
    pub fn renew_lease(&self, key: &JobKey, lease: &Lease<'_>, ttl: TimeDelta) -> Result<()> {
        let now = self.clock.now();
        let blocked = self.kv.put_unless_live(
            &lease.slot,
            &lease.owner.to_string(),
            Some(now + ttl),
            now,
        )?;
        match blocked {
            Some(held) => Err(Error::LeaseHeld {
                key: key.to_string(),
                owner: held.value,
                until: held.expires_at.unwrap_or(now),
            }),
            None => Ok(()),
        }
    }
}

/// Held lease on a job key. Released on drop if still owned.
pub struct Lease<'a> {
    kv: &'a dyn KvStore,
    slot: String,
    owner: Uuid,
}

impl Lease<'_> {
    pub fn owner(&self) -> Uuid {
        self.owner
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let owned = match self.kv.get(&self.slot) {
            Ok(Some(entry)) => entry.value == self.owner.to_string(),
            Ok(None) => false,
            Err(e) => {
                warn!(slot = %self.slot, "failed to read lease on release: {e}");
                false
            }
        };
        if owned {
            if let Err(e) = self.kv.delete(&self.slot) {
                warn!(slot = %self.slot, "failed to release lease: {e}");
            }
        }
    }
}
