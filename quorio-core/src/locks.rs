//! Namespace locks held on (bucket, object) pairs.
//!
//! Lockers are consumed through [`NamespaceLocker`]. [`LocalNsLocker`] is the
//! in-process lock table each node runs; it also holds locks on behalf of
//! [`crate::QuorumNsLocker`], which takes a lock on a majority of peers.

use crate::names::{check_bucket_name, is_valid_object_prefix, parse_duration};
use crate::{QuorioError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub bucket: String,
    pub object: String,
    #[serde(rename = "lockID")]
    pub lock_id: String,
    pub held_since: DateTime<Utc>,
    pub source: String,
    /// Address of the node that reported the record.
    #[serde(default)]
    pub node: String,
}

/// A lock taken on a peer on behalf of another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub bucket: String,
    pub object: String,
    #[serde(rename = "lockID")]
    pub lock_id: String,
    pub source: String,
}

impl LockRequest {
    /// A request under a fresh lock id.
    pub fn new(bucket: impl Into<String>, object: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            lock_id: Ulid::new().to_string(),
            source: source.into(),
        }
    }
}

/// Bucket/prefix/age selection shared by lock listing and clearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFilter {
    pub bucket: String,
    pub prefix: String,
    pub min_age: Duration,
}

impl LockFilter {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>, min_age: Duration) -> Result<Self> {
        let bucket = bucket.into();
        let prefix = prefix.into();

        check_bucket_name(&bucket)?;
        if !is_valid_object_prefix(&prefix) {
            return Err(QuorioError::InvalidObjectName(prefix));
        }

        Ok(Self {
            bucket,
            prefix,
            min_age,
        })
    }

    /// Builds a filter from raw query values; an absent duration means `0s`.
    pub fn from_query(bucket: Option<&str>, prefix: Option<&str>, duration: Option<&str>) -> Result<Self> {
        let bucket = bucket.unwrap_or_default();
        let prefix = prefix.unwrap_or_default();
        check_bucket_name(bucket)?;
        if !is_valid_object_prefix(prefix) {
            return Err(QuorioError::InvalidObjectName(prefix.to_string()));
        }
        let min_age = parse_duration(duration.unwrap_or("0s"))?;

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            min_age,
        })
    }

    pub fn matches(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        if record.bucket != self.bucket || !record.object.starts_with(&self.prefix) {
            return false;
        }

        let held_for = (now - record.held_since).to_std().unwrap_or(Duration::ZERO);
        held_for >= self.min_age
    }
}

/// Releases a namespace lock when dropped.
pub struct NsLockGuard {
    guard: Option<Box<dyn Any + Send + Sync>>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl NsLockGuard {
    pub fn new(
        guard: impl Any + Send + Sync,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            guard: Some(Box::new(guard)),
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for NsLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for NsLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NsLockGuard").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait NamespaceLocker: Send + Sync {
    /// Acquires an exclusive lock on `bucket/object`.
    async fn lock(&self, bucket: &str, object: &str, source: &str) -> Result<NsLockGuard>;
}

type LockKey = (String, String);

struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    holders: HashMap<String, LockRecord>,
    /// Guards of locks held for another node, keyed by lock id.
    held: HashMap<String, OwnedMutexGuard<()>>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            holders: HashMap::new(),
            held: HashMap::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && Arc::strong_count(&self.mutex) == 1
    }
}

type LockTable = Mutex<HashMap<LockKey, LockEntry>>;

pub struct LocalNsLocker {
    node: String,
    table: Arc<LockTable>,
}

impl LocalNsLocker {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<LockKey, LockEntry>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, bucket: &str, object: &str, lock_id: &str, source: &str) -> LockRecord {
        LockRecord {
            bucket: bucket.to_string(),
            object: object.to_string(),
            lock_id: lock_id.to_string(),
            held_since: Utc::now(),
            source: source.to_string(),
            node: self.node.clone(),
        }
    }

    /// Snapshot of held locks matching `filter`.
    pub fn list(&self, filter: &LockFilter, now: DateTime<Utc>) -> Vec<LockRecord> {
        let mut records: Vec<LockRecord> = self
            .table()
            .values()
            .flat_map(|entry| entry.holders.values())
            .filter(|record| filter.matches(record, now))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (a.object.as_str(), a.held_since).cmp(&(b.object.as_str(), b.held_since))
        });
        records
    }

    /// Force-releases `bucket/object` if `lock_id` still holds it. A lock
    /// taken under another id is left alone.
    pub fn force_unlock(&self, bucket: &str, object: &str, lock_id: &str) -> bool {
        let key: LockKey = (bucket.to_string(), object.to_string());
        let mut table = self.table();
        let held = table
            .get(&key)
            .is_some_and(|entry| entry.holders.contains_key(lock_id));
        if !held {
            return false;
        }

        // Dropping the entry orphans the stuck mutex; new lockers get a fresh one.
        table.remove(&key);
        tracing::warn!(
            "Force-released namespace lock {}/{} ({})",
            bucket,
            object,
            lock_id
        );
        true
    }

    /// Takes `bucket/object` without waiting and holds it as `lock_id` until
    /// [`Self::release`]. Taking it again under the same id succeeds.
    pub fn try_hold(&self, request: &LockRequest) -> bool {
        let key: LockKey = (request.bucket.clone(), request.object.clone());
        let record = self.record(&request.bucket, &request.object, &request.lock_id, &request.source);
        let mut table = self.table();
        let entry = table.entry(key).or_insert_with(LockEntry::new);

        match entry.mutex.clone().try_lock_owned() {
            Ok(guard) => {
                entry.holders.insert(request.lock_id.clone(), record);
                entry.held.insert(request.lock_id.clone(), guard);
                tracing::debug!(
                    "Holding namespace lock {}/{} ({}) for {}",
                    request.bucket,
                    request.object,
                    request.lock_id,
                    request.source
                );
                true
            }
            Err(_) => entry.held.contains_key(&request.lock_id),
        }
    }

    /// Releases a lock taken with [`Self::try_hold`].
    pub fn release(&self, request: &LockRequest) -> bool {
        let key: LockKey = (request.bucket.clone(), request.object.clone());
        let mut table = self.table();
        let Some(entry) = table.get_mut(&key) else {
            return false;
        };
        let Some(guard) = entry.held.remove(&request.lock_id) else {
            return false;
        };
        drop(guard);
        entry.holders.remove(&request.lock_id);
        if entry.is_idle() {
            table.remove(&key);
        }
        true
    }
}

fn release_holder(table: &Weak<LockTable>, key: &LockKey, lock_id: &str) {
    let Some(table) = table.upgrade() else {
        return;
    };
    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);

    let remove_entry = match table.get_mut(key) {
        Some(entry) => {
            entry.holders.remove(lock_id);
            entry.is_idle()
        }
        None => false,
    };
    if remove_entry {
        table.remove(key);
    }
}

#[async_trait]
impl NamespaceLocker for LocalNsLocker {
    async fn lock(&self, bucket: &str, object: &str, source: &str) -> Result<NsLockGuard> {
        let key: LockKey = (bucket.to_string(), object.to_string());
        let mutex = self
            .table()
            .entry(key.clone())
            .or_insert_with(LockEntry::new)
            .mutex
            .clone();

        let guard = mutex.lock_owned().await;

        let record = self.record(bucket, object, &Ulid::new().to_string(), source);
        let lock_id = record.lock_id.clone();
        self.table()
            .entry(key.clone())
            .or_insert_with(LockEntry::new)
            .holders
            .insert(lock_id.clone(), record);

        tracing::debug!("Acquired namespace lock {}/{} ({})", bucket, object, lock_id);

        let table = Arc::downgrade(&self.table);
        Ok(NsLockGuard::new(guard, move || {
            release_holder(&table, &key, &lock_id)
        }))
    }
}
