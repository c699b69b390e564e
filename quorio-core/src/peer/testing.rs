//! Scriptable in-memory peer for exercising coordination logic.

use super::{AdminPeerClient, Peer, PeerOutcome};
use crate::{
    Credentials, LocalNsLocker, LockFilter, LockRecord, LockRequest, PeerError, ServiceCommand,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct MockCalls {
    pub staged: Vec<(String, Bytes)>,
    pub committed: Vec<String>,
    pub services: Vec<ServiceCommand>,
    pub credentials: Vec<Credentials>,
    pub lock_filters: Vec<LockFilter>,
    pub force_unlocked: Vec<LockRecord>,
    pub reinit: usize,
}

pub(crate) struct MockPeer {
    uptime: PeerOutcome<Duration>,
    config: PeerOutcome<Bytes>,
    locks: PeerOutcome<Vec<LockRecord>>,
    stage_error: Option<PeerError>,
    commit_error: Option<PeerError>,
    reinit_error: Option<PeerError>,
    credentials_error: Option<PeerError>,
    lock_error: Option<PeerError>,
    delay: Duration,
    /// Backs the lock calls; listed after any scripted locks.
    pub locker: LocalNsLocker,
    pub calls: Mutex<MockCalls>,
}

impl MockPeer {
    pub fn healthy() -> Self {
        Self {
            uptime: Ok(Duration::from_secs(60)),
            config: Ok(Bytes::from_static(b"{}")),
            locks: Ok(Vec::new()),
            stage_error: None,
            commit_error: None,
            reinit_error: None,
            credentials_error: None,
            lock_error: None,
            delay: Duration::ZERO,
            locker: LocalNsLocker::new("mock"),
            calls: Mutex::new(MockCalls::default()),
        }
    }

    /// A peer whose every call fails with `error`.
    pub fn failing(error: PeerError) -> Self {
        Self {
            uptime: Err(error.clone()),
            config: Err(error.clone()),
            locks: Err(error.clone()),
            stage_error: Some(error.clone()),
            commit_error: Some(error.clone()),
            reinit_error: Some(error.clone()),
            credentials_error: Some(error.clone()),
            lock_error: Some(error),
            ..Self::healthy()
        }
    }

    pub fn with_uptime(mut self, uptime: Duration) -> Self {
        self.uptime = Ok(uptime);
        self
    }

    pub fn with_uptime_error(mut self, error: PeerError) -> Self {
        self.uptime = Err(error);
        self
    }

    pub fn with_config(mut self, config: &'static [u8]) -> Self {
        self.config = Ok(Bytes::from_static(config));
        self
    }

    pub fn with_locks(mut self, locks: Vec<LockRecord>) -> Self {
        self.locks = Ok(locks);
        self
    }

    pub fn with_stage_error(mut self, error: PeerError) -> Self {
        self.stage_error = Some(error);
        self
    }

    pub fn with_commit_error(mut self, error: PeerError) -> Self {
        self.commit_error = Some(error);
        self
    }

    pub fn with_reinit_error(mut self, error: PeerError) -> Self {
        self.reinit_error = Some(error);
        self
    }

    pub fn with_lock_error(mut self, error: PeerError) -> Self {
        self.lock_error = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_peer(self, address: &str, is_local: bool) -> Peer {
        Peer::new(address, is_local, Arc::new(self))
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn record(&self, f: impl FnOnce(&mut MockCalls)) {
        f(&mut self.calls.lock().unwrap());
    }
}

pub(crate) fn peer_of(mock: &Arc<MockPeer>, address: &str, is_local: bool) -> Peer {
    Peer::new(address, is_local, mock.clone())
}

fn fail_or_ok(error: &Option<PeerError>) -> PeerOutcome<()> {
    match error {
        Some(error) => Err(error.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl AdminPeerClient for MockPeer {
    async fn uptime(&self) -> PeerOutcome<Duration> {
        self.pause().await;
        self.uptime.clone()
    }

    async fn service(&self, command: ServiceCommand) -> PeerOutcome<()> {
        self.pause().await;
        self.record(|calls| calls.services.push(command));
        Ok(())
    }

    async fn set_credentials(&self, credentials: &Credentials) -> PeerOutcome<()> {
        self.pause().await;
        fail_or_ok(&self.credentials_error)?;
        self.record(|calls| calls.credentials.push(credentials.clone()));
        Ok(())
    }

    async fn list_locks(&self, filter: &LockFilter) -> PeerOutcome<Vec<LockRecord>> {
        self.pause().await;
        self.record(|calls| calls.lock_filters.push(filter.clone()));
        let mut locks = self.locks.clone()?;
        locks.extend(self.locker.list(filter, Utc::now()));
        Ok(locks)
    }

    async fn force_unlock(&self, record: &LockRecord) -> PeerOutcome<bool> {
        self.pause().await;
        fail_or_ok(&self.lock_error)?;
        self.record(|calls| calls.force_unlocked.push(record.clone()));
        Ok(self
            .locker
            .force_unlock(&record.bucket, &record.object, &record.lock_id))
    }

    async fn acquire_lock(&self, request: &LockRequest) -> PeerOutcome<bool> {
        self.pause().await;
        fail_or_ok(&self.lock_error)?;
        Ok(self.locker.try_hold(request))
    }

    async fn release_lock(&self, request: &LockRequest) -> PeerOutcome<bool> {
        self.pause().await;
        fail_or_ok(&self.lock_error)?;
        Ok(self.locker.release(request))
    }

    async fn reinit_storage(&self) -> PeerOutcome<()> {
        self.pause().await;
        fail_or_ok(&self.reinit_error)?;
        self.record(|calls| calls.reinit += 1);
        Ok(())
    }

    async fn get_config(&self) -> PeerOutcome<Bytes> {
        self.pause().await;
        self.config.clone()
    }

    async fn stage_config(&self, name: &str, payload: Bytes) -> PeerOutcome<()> {
        self.pause().await;
        fail_or_ok(&self.stage_error)?;
        self.record(|calls| calls.staged.push((name.to_string(), payload)));
        Ok(())
    }

    async fn commit_config(&self, name: &str) -> PeerOutcome<()> {
        self.pause().await;
        fail_or_ok(&self.commit_error)?;
        self.record(|calls| calls.committed.push(name.to_string()));
        Ok(())
    }
}
