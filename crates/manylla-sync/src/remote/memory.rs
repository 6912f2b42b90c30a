//! In-process blob server with fault injection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use manylla_core::time::unix_millis;

use super::{RemoteBlob, RemoteError, RemoteStore, ShareRequest, ShareStore};

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<String, RemoteBlob>,
    shares: Vec<ShareRequest>,
    delay: Option<Duration>,
    failure: Option<u16>,
    puts: usize,
    fetches: usize,
}

/// Fake blob server. Hand the same `Arc` to two sessions to simulate two
/// devices talking to one server.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw stored blob for `sync_id`.
    pub fn blob(&self, sync_id: &str) -> Option<String> {
        self.state()
            .blobs
            .get(sync_id)
            .map(|b| b.encrypted_blob.clone())
    }

    /// Overwrite a stored blob directly (e.g. to corrupt it).
    pub fn set_blob(&self, sync_id: &str, encrypted_blob: &str) {
        self.state().blobs.insert(
            sync_id.to_string(),
            RemoteBlob {
                encrypted_blob: encrypted_blob.to_string(),
                timestamp: unix_millis(),
            },
        );
    }

    pub fn shares(&self) -> Vec<ShareRequest> {
        self.state().shares.clone()
    }

    /// Delay every call by `delay` before it touches state.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// Make every call fail with this HTTP status until cleared.
    pub fn set_failure(&self, status: Option<u16>) {
        self.state().failure = status;
    }

    pub fn put_count(&self) -> usize {
        self.state().puts
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    async fn before_call(&self) -> Result<(), RemoteError> {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state().failure {
            Some(status) => Err(RemoteError::Api {
                status,
                message: "injected failure".into(),
            }),
            None => Ok(()),
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn put_blob(&self, sync_id: &str, encrypted_blob: &str) -> Result<(), RemoteError> {
        self.before_call().await?;
        self.set_blob(sync_id, encrypted_blob);
        self.state().puts += 1;
        Ok(())
    }

    async fn fetch_blob(&self, sync_id: &str) -> Result<Option<RemoteBlob>, RemoteError> {
        self.before_call().await?;
        let mut state = self.state();
        state.fetches += 1;
        Ok(state.blobs.get(sync_id).cloned())
    }
}

impl ShareStore for MemoryRemote {
    async fn create_share(&self, request: &ShareRequest) -> Result<(), RemoteError> {
        self.before_call().await?;
        self.state().shares.push(request.clone());
        Ok(())
    }
}
