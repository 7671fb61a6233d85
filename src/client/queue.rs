use std::collections::VecDeque;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::RefreshError;

/// What a queued request is eventually told: the new access token, or why
/// there is none.
pub type RefreshOutcome = Result<String, RefreshError>;

/// A request parked until the in-flight refresh settles.
#[derive(Debug)]
pub struct PendingRequest {
    pub ticket: u64,
    pub request_id: Uuid,
    sender: oneshot::Sender<RefreshOutcome>,
}

/// Requests that hit a 401/403 while a refresh was already running, in arrival order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    next_ticket: u64,
    entries: VecDeque<PendingRequest>,
}

impl PendingQueue {
    /// Appends a waiter and hands back its ticket and the receiving end.
    pub fn push(&mut self, request_id: Uuid) -> (u64, oneshot::Receiver<RefreshOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.entries.push_back(PendingRequest {
            ticket,
            request_id,
            sender,
        });
        (ticket, receiver)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hands `outcome` to every waiter, front to back, and empties the queue.
    /// Returns the tickets in the order they were settled.
    pub fn settle(&mut self, outcome: &RefreshOutcome) -> Vec<u64> {
        let mut order = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop_front() {
            // A waiter whose caller went away just misses the result.
            let _ = entry.sender.send(outcome.clone());
            order.push(entry.ticket);
        }
        order
    }
}

/// The per-client refresh bookkeeping.
#[derive(Debug, Default)]
pub struct RefreshState {
    /// True while exactly one task owns the refresh call.
    pub is_refreshing: bool,
    /// Refreshes started since the last successful one.
    pub refresh_attempts: u32,
    /// Bumped whenever the session is cleared. A refresh started under an
    /// older epoch must not write its tokens.
    pub session_epoch: u64,
    pub queue: PendingQueue,
}
