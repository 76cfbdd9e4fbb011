//! Per-invocation completion channels.
//!
//! Every dispatched event gets an id and a oneshot channel. The sender sits
//! in the artifact's [`PendingTable`] until the guest responds, fails, or the
//! caller gives up; the receiver is held by the caller inside an
//! [`Invocation`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

use lambda_dev_common::LambdaError;

use crate::response::ResponseDescriptor;

/// Id passed to `edge.emit_error` to fail every pending invocation.
pub const BROADCAST_INVOCATION: u64 = 0;

/// How an invocation finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The handler responded.
    Completed(ResponseDescriptor),
    /// The handler signalled an error or trapped.
    Failed(String),
}

/// Invocations that have not finished yet, shared by the artifact and its
/// store.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    entries: Arc<DashMap<u64, oneshot::Sender<Outcome>>>,
}

impl PendingTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiving half.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, tx);
        rx
    }

    /// Complete `id`.
    ///
    /// Returns `false` if the invocation already finished or its caller
    /// stopped waiting; the first completion wins.
    pub fn complete(&self, id: u64, outcome: Outcome) -> bool {
        match self.entries.remove(&id) {
            Some((_, tx)) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Fail `id`, or every pending invocation for [`BROADCAST_INVOCATION`].
    ///
    /// Returns the number of invocations failed.
    pub fn fail(&self, id: u64, message: &str) -> usize {
        if id != BROADCAST_INVOCATION {
            return usize::from(self.complete(id, Outcome::Failed(message.to_string())));
        }

        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.complete(*id, Outcome::Failed(message.to_string())))
            .count()
    }

    /// Detach `id` without completing it.
    pub fn detach(&self, id: u64) {
        self.entries.remove(&id);
    }

    /// Detach every invocation; their callers observe a closed channel.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Returns `true` if `id` is still waiting.
    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of invocations still waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The caller's side of one dispatched event.
///
/// Dropping it removes the pending entry, so an abandoned invocation (for
/// example after a timeout) leaves nothing behind on the artifact.
#[derive(Debug)]
pub struct Invocation {
    id: u64,
    receiver: oneshot::Receiver<Outcome>,
    pending: PendingTable,
}

impl Invocation {
    pub(crate) fn new(id: u64, receiver: oneshot::Receiver<Outcome>, pending: PendingTable) -> Self {
        Self {
            id,
            receiver,
            pending,
        }
    }

    /// The invocation id seen by the guest.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the handler to respond.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Sandbox`] if the handler failed or the artifact
    /// was torn down before it responded.
    pub async fn completion(&mut self) -> Result<ResponseDescriptor, LambdaError> {
        match (&mut self.receiver).await {
            Ok(Outcome::Completed(descriptor)) => Ok(descriptor),
            Ok(Outcome::Failed(message)) => Err(LambdaError::sandbox(message)),
            Err(_) => Err(LambdaError::sandbox(
                "the function was torn down before it responded",
            )),
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        self.pending.detach(self.id);
    }
}
