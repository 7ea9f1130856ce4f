//! Matching responses to outstanding requests
//!
//! Every request registers a pending entry keyed by its invoke id. The
//! reader task resolves entries as responses arrive; callers wait on a
//! [`PendingResponse`] bounded by a timeout. A timed-out entry is removed
//! and the connection is left open.

use dlms_application::Apdu;
use dlms_core::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// How a response finds its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Match the response's invoke id; unknown ids are logged and dropped
    #[default]
    InvokeId,
    /// Resolve the oldest pending request, for meters that echo a wrong invoke id
    Oldest,
}

struct PendingEntry {
    /// Unique per registration, invoke ids wrap
    key: u64,
    invoke_id: u8,
    completion: oneshot::Sender<DlmsResult<Apdu>>,
}

type PendingTable = Arc<Mutex<VecDeque<PendingEntry>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, VecDeque<PendingEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pending-request table of one client connection
pub struct RequestCorrelator {
    strategy: MatchStrategy,
    pending: PendingTable,
    next_key: AtomicU64,
}

impl RequestCorrelator {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            next_key: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Register a request about to be sent
    pub fn register(&self, invoke_id: u8, timeout: Duration) -> PendingResponse {
        let (completion, receiver) = oneshot::channel();
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let mut pending = lock(&self.pending);
        if let Some(pos) = pending.iter().position(|e| e.invoke_id == invoke_id) {
            if let Some(stale) = pending.remove(pos) {
                log::warn!("invoke id {} reused while still pending", invoke_id);
                let _ = stale.completion.send(Err(DlmsError::Protocol(format!(
                    "invoke id {} reused",
                    invoke_id
                ))));
            }
        }
        pending.push_back(PendingEntry {
            key,
            invoke_id,
            completion,
        });

        PendingResponse {
            key,
            invoke_id,
            timeout,
            receiver,
            table: Arc::clone(&self.pending),
        }
    }

    /// Hand a response to its waiting request
    ///
    /// Returns `false` when no pending request matched and the response was dropped.
    pub fn resolve(&self, apdu: Apdu) -> bool {
        let entry = {
            let mut pending = lock(&self.pending);
            match (self.strategy, apdu.invoke_id()) {
                (MatchStrategy::InvokeId, Some(invoke_id)) => pending
                    .iter()
                    .position(|e| e.invoke_id == invoke_id)
                    .and_then(|pos| pending.remove(pos)),
                (MatchStrategy::InvokeId, None) => None,
                (MatchStrategy::Oldest, _) => pending.pop_front(),
            }
        };

        match entry {
            Some(entry) => {
                if apdu.invoke_id() != Some(entry.invoke_id) {
                    log::debug!(
                        "{} with invoke id {:?} paired with request {}",
                        apdu.name(),
                        apdu.invoke_id(),
                        entry.invoke_id
                    );
                }
                if entry.completion.send(Ok(apdu)).is_err() {
                    log::debug!("request {} was abandoned before its response", entry.invoke_id);
                }
                true
            }
            None => {
                log::warn!(
                    "invoke id mismatch: {} with invoke id {:?} matches no pending request, dropped",
                    apdu.name(),
                    apdu.invoke_id()
                );
                false
            }
        }
    }

    /// Fail every pending request, used when the connection is lost
    pub fn fail_all(&self, error: DlmsError) {
        let drained: Vec<PendingEntry> = lock(&self.pending).drain(..).collect();
        if !drained.is_empty() {
            log::debug!("failing {} pending requests: {}", drained.len(), error);
        }
        for entry in drained {
            let _ = entry.completion.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Completion handle of one registered request
///
/// Dropping the handle removes its entry, so an abandoned request never
/// takes a later response.
pub struct PendingResponse {
    key: u64,
    invoke_id: u8,
    timeout: Duration,
    receiver: oneshot::Receiver<DlmsResult<Apdu>>,
    table: PendingTable,
}

impl PendingResponse {
    pub fn invoke_id(&self) -> u8 {
        self.invoke_id
    }

    /// Wait for the response; on timeout the entry is removed
    pub async fn wait(mut self) -> DlmsResult<Apdu> {
        match tokio::time::timeout(self.timeout, &mut self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DlmsError::Transport("request abandoned".to_string())),
            Err(_) => {
                self.cancel_entry();
                log::warn!("request {} timed out after {:?}", self.invoke_id, self.timeout);
                Err(DlmsError::Timeout)
            }
        }
    }

    /// Drop the entry without waiting, used when sending the request failed
    pub fn cancel(self) {
        drop(self);
    }

    fn cancel_entry(&self) {
        let mut pending = lock(&self.table);
        if let Some(pos) = pending.iter().position(|e| e.key == self.key) {
            pending.remove(pos);
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.cancel_entry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_application::pdu::{GetResponse, SetResponse};
    use dlms_core::DataObject;

    fn get_response(invoke_id: u8, value: u8) -> Apdu {
        Apdu::GetResponse(GetResponse::data(invoke_id, DataObject::Unsigned8(value)))
    }

    #[tokio::test]
    async fn test_resolves_by_invoke_id() {
        let correlator = RequestCorrelator::new(MatchStrategy::InvokeId);
        let first = correlator.register(1, Duration::from_secs(1));
        let second = correlator.register(2, Duration::from_secs(1));

        assert!(correlator.resolve(get_response(2, 20)));
        assert!(correlator.resolve(get_response(1, 10)));

        assert_eq!(first.wait().await.unwrap(), get_response(1, 10));
        assert_eq!(second.wait().await.unwrap(), get_response(2, 20));
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_invoke_id_dropped() {
        let correlator = RequestCorrelator::new(MatchStrategy::InvokeId);
        let _pending = correlator.register(1, Duration::from_secs(1));
        assert!(!correlator.resolve(get_response(9, 0)));
        assert_eq!(correlator.len(), 1);
    }

    #[tokio::test]
    async fn test_oldest_strategy() {
        let correlator = RequestCorrelator::new(MatchStrategy::Oldest);
        let first = correlator.register(1, Duration::from_secs(1));
        let _second = correlator.register(2, Duration::from_secs(1));

        let response = Apdu::SetResponse(SetResponse { invoke_id: 7, result: 0 });
        assert!(correlator.resolve(response.clone()));
        assert_eq!(first.wait().await.unwrap(), response);
        assert_eq!(correlator.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let correlator = RequestCorrelator::new(MatchStrategy::InvokeId);
        let pending = correlator.register(3, Duration::from_secs(30));
        assert_eq!(correlator.len(), 1);

        assert_eq!(pending.wait().await, Err(DlmsError::Timeout));
        assert!(correlator.is_empty());
        assert!(!correlator.resolve(get_response(3, 1)));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let correlator = RequestCorrelator::new(MatchStrategy::InvokeId);
        let first = correlator.register(1, Duration::from_secs(5));
        let second = correlator.register(2, Duration::from_secs(5));

        correlator.fail_all(DlmsError::Transport("closed".into()));
        assert_eq!(first.wait().await, Err(DlmsError::Transport("closed".into())));
        assert_eq!(second.wait().await, Err(DlmsError::Transport("closed".into())));
    }

    #[tokio::test]
    async fn test_abandoned_wait_releases_entry() {
        let correlator = RequestCorrelator::new(MatchStrategy::Oldest);
        let abandoned = correlator.register(1, Duration::from_secs(30));
        let wait = abandoned.wait();
        // Caller gave up before the meter answered
        assert!(tokio::time::timeout(Duration::from_millis(1), wait).await.is_err());
        assert!(correlator.is_empty());

        let next = correlator.register(2, Duration::from_secs(30));
        let response = get_response(2, 42);
        assert!(correlator.resolve(response.clone()));
        assert_eq!(next.wait().await.unwrap(), response);
    }

    #[tokio::test]
    async fn test_dropping_old_handle_keeps_reused_invoke_id() {
        let correlator = RequestCorrelator::new(MatchStrategy::InvokeId);
        let first = correlator.register(5, Duration::from_secs(5));
        assert!(correlator.resolve(get_response(5, 1)));
        let second = correlator.register(5, Duration::from_secs(5));
        drop(first);
        assert_eq!(correlator.len(), 1);
        assert!(correlator.resolve(get_response(5, 2)));
        assert_eq!(second.wait().await.unwrap(), get_response(5, 2));
    }

    #[tokio::test]
    async fn test_cancel() {
        let correlator = RequestCorrelator::new(MatchStrategy::InvokeId);
        let pending = correlator.register(4, Duration::from_secs(5));
        pending.cancel();
        assert!(correlator.is_empty());
    }
}
