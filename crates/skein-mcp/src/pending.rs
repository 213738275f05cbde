//! In-flight call tracking for a single transport instance
//!
//! Every `send` registers its request id here before the request is written.
//! Whichever of resolve, fail or expire removes the entry first decides the
//! outcome; the others become no-ops, so a waiter completes exactly once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::protocol::ValidationError;
use crate::transport::TransportError;
use crate::types::{McpResponse, RequestId};

type Outcome = Result<McpResponse, TransportError>;

struct PendingEntry {
    tx: oneshot::Sender<Outcome>,
    timeout: Duration,
}

/// Registry of outstanding calls, shared between the send and receive paths
#[derive(Clone, Default)]
pub struct PendingCalls {
    entries: Arc<DashMap<RequestId, PendingEntry>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding call that fails with a timeout after `timeout`
    pub fn register(&self, id: RequestId, timeout: Duration) -> Result<PendingCall, ValidationError> {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => Err(ValidationError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingEntry { tx, timeout });
                trace!(id = %id, ?timeout, "registered pending call");
                Ok(PendingCall {
                    id,
                    rx,
                    deadline: Instant::now() + timeout,
                    registry: self.clone(),
                })
            }
        }
    }

    /// Fulfil the call matching `response.id`.
    ///
    /// Hands the response back when nothing is waiting for it, which makes it
    /// an unsolicited message.
    pub fn resolve(&self, response: McpResponse) -> Result<(), McpResponse> {
        let Some(id) = response.id.clone() else {
            return Err(response);
        };
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(Ok(response));
                Ok(())
            }
            None => Err(response),
        }
    }

    /// Fail a single call. Returns false if it was no longer pending.
    pub fn fail(&self, id: &RequestId, error: TransportError) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail a call with a timeout error. Returns false if it was no longer pending.
    pub fn expire(&self, id: &RequestId) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                debug!(id = %id, timeout = ?entry.timeout, "pending call expired");
                let _ = entry.tx.send(Err(TransportError::Timeout {
                    id: id.clone(),
                    timeout: entry.timeout,
                }));
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding call and clear the registry
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> TransportError,
    {
        let ids: Vec<RequestId> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if self.fail(&id, make_error()) {
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, "failed all pending calls");
        }
        failed
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Waiter half of a registered call
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
    deadline: Instant,
    registry: PendingCalls,
}

impl PendingCall {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the correlated response, a failure, or the deadline
    pub async fn wait(mut self) -> Outcome {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed(
                "pending call was dropped".to_string(),
            )),
            Err(_) => {
                // Either we expire it now, or a resolve/fail already won and
                // its outcome is sitting in the channel.
                self.registry.expire(&self.id);
                match (&mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::ConnectionClosed(
                        "pending call was dropped".to_string(),
                    )),
                }
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        // Abandoned waiters must not leave entries behind.
        self.registry.entries.remove(&self.id);
    }
}
