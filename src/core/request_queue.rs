//! Durable request queue with lifecycle transitions.
//!
//! The queue keeps an in-memory index of every request and writes each
//! transition through a [`RequestStore`] before it becomes visible. All
//! mutations take the write half of a `parking_lot::RwLock`, so there is a
//! single writer at a time; readers take the read half and always observe a
//! state that has already been persisted.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::core::error::SchedulerError;
use crate::core::request::{Request, RequestId, RequestStatus};

/// Abstraction for durable request storage backends.
pub trait RequestStore: Send + Sync {
    /// Load every persisted request. Called once when the queue is opened.
    fn load(&mut self) -> Result<Vec<Request>, SchedulerError>;
    /// Durably record the latest version of a request before returning.
    fn persist(&mut self, request: &Request) -> Result<(), SchedulerError>;
    /// Flush and compact any buffered state.
    fn flush(&mut self) -> Result<(), SchedulerError>;
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

struct QueueIndex {
    requests: HashMap<RequestId, Request>,
    /// Queued requests keyed by `queue_seq`.
    queued: BTreeMap<i64, RequestId>,
    processing: Option<RequestId>,
    next_seq: i64,
    store: Box<dyn RequestStore>,
}

impl QueueIndex {
    fn head_seq(&self) -> i64 {
        self.queued.keys().next().copied().unwrap_or(self.next_seq)
    }

    fn lookup(&self, id: RequestId) -> Result<&Request, SchedulerError> {
        self.requests.get(&id).ok_or(SchedulerError::NotFound(id))
    }

    /// Persist then apply; on storage failure the index is left untouched.
    fn commit(&mut self, updated: Request) -> Result<(), SchedulerError> {
        self.store.persist(&updated)?;
        let previous = self.requests.get(&updated.id).map(|r| (r.status, r.queue_seq));
        if let Some((RequestStatus::Queued, seq)) = previous {
            self.queued.remove(&seq);
        }
        if self.processing == Some(updated.id) && updated.status != RequestStatus::Processing {
            self.processing = None;
        }
        match updated.status {
            RequestStatus::Queued => {
                self.queued.insert(updated.queue_seq, updated.id);
            }
            RequestStatus::Processing => self.processing = Some(updated.id),
            RequestStatus::Completed | RequestStatus::Failed => {}
        }
        self.requests.insert(updated.id, updated);
        Ok(())
    }

    fn finish(
        &mut self,
        id: RequestId,
        to: RequestStatus,
        result: Option<String>,
        error: Option<String>,
        now_ms: u64,
    ) -> Result<Request, SchedulerError> {
        let current = self.lookup(id)?;
        if current.status != RequestStatus::Processing {
            return Err(SchedulerError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }
        let mut updated = current.clone();
        updated.status = to;
        updated.result = result;
        updated.error = error;
        updated.completed_at_ms = Some(now_ms);
        self.commit(updated.clone())?;
        Ok(updated)
    }
}

/// Persistent FIFO of inference requests.
pub struct RequestQueue {
    inner: RwLock<QueueIndex>,
}

impl RequestQueue {
    /// Open a queue over a store, replaying everything it holds.
    ///
    /// Requests found in `Processing` stay there until
    /// [`reconcile_on_startup`](Self::reconcile_on_startup) runs.
    pub fn open(mut store: Box<dyn RequestStore>) -> Result<Self, SchedulerError> {
        let loaded = store.load()?;
        let mut index = QueueIndex {
            requests: HashMap::with_capacity(loaded.len()),
            queued: BTreeMap::new(),
            processing: None,
            next_seq: 0,
            store,
        };
        for request in loaded {
            index.next_seq = index.next_seq.max(request.queue_seq.saturating_add(1));
            match request.status {
                RequestStatus::Queued => {
                    index.queued.insert(request.queue_seq, request.id);
                }
                RequestStatus::Processing => {
                    index.processing.get_or_insert(request.id);
                }
                RequestStatus::Completed | RequestStatus::Failed => {}
            }
            index.requests.insert(request.id, request);
        }
        tracing::info!(
            backend = index.store.backend(),
            total = index.requests.len(),
            queued = index.queued.len(),
            "request queue opened"
        );
        Ok(Self {
            inner: RwLock::new(index),
        })
    }

    /// Append a new request at the tail. Durable before returning.
    pub fn enqueue(&self, prompt: impl Into<String>, now_ms: u64) -> Result<RequestId, SchedulerError> {
        let mut inner = self.inner.write();
        let request = Request::queued(prompt, now_ms, inner.next_seq);
        let id = request.id;
        inner.commit(request)?;
        inner.next_seq += 1;
        tracing::debug!(request_id = %id, depth = inner.queued.len(), "request enqueued");
        Ok(id)
    }

    /// Oldest queued request, if any.
    pub fn peek_head(&self) -> Option<Request> {
        let inner = self.inner.read();
        inner
            .queued
            .values()
            .next()
            .and_then(|id| inner.requests.get(id).cloned())
    }

    /// Move a queued request into `Processing`.
    ///
    /// Fails if another request is already processing or `id` is not queued.
    pub fn begin_processing(&self, id: RequestId, now_ms: u64) -> Result<Request, SchedulerError> {
        let mut inner = self.inner.write();
        let current = inner.lookup(id)?;
        if current.status != RequestStatus::Queued {
            return Err(SchedulerError::InvalidTransition {
                id,
                from: current.status,
                to: RequestStatus::Processing,
            });
        }
        if let Some(active) = inner.processing {
            tracing::warn!(request_id = %id, active = %active, "refusing second in-flight request");
            return Err(SchedulerError::InvalidTransition {
                id,
                from: RequestStatus::Queued,
                to: RequestStatus::Processing,
            });
        }
        let mut updated = current.clone();
        updated.status = RequestStatus::Processing;
        updated.started_at_ms = Some(now_ms);
        inner.commit(updated.clone())?;
        Ok(updated)
    }

    /// Mark the processing request as completed with its output.
    pub fn complete(
        &self,
        id: RequestId,
        result: impl Into<String>,
        now_ms: u64,
    ) -> Result<Request, SchedulerError> {
        self.inner
            .write()
            .finish(id, RequestStatus::Completed, Some(result.into()), None, now_ms)
    }

    /// Mark the processing request as failed with an error message.
    pub fn fail(
        &self,
        id: RequestId,
        error: impl Into<String>,
        now_ms: u64,
    ) -> Result<Request, SchedulerError> {
        self.inner
            .write()
            .finish(id, RequestStatus::Failed, None, Some(error.into()), now_ms)
    }

    /// Number of queued requests strictly ahead of `id`; `None` if not queued.
    pub fn position_of(&self, id: RequestId) -> Option<usize> {
        let inner = self.inner.read();
        let request = inner.requests.get(&id)?;
        if request.status != RequestStatus::Queued {
            return None;
        }
        Some(inner.queued.range(..request.queue_seq).count())
    }

    /// Return requests orphaned in `Processing` by a crash to the head of the
    /// queue, keeping their relative order. Returns the requeued ids.
    pub fn reconcile_on_startup(&self) -> Result<Vec<RequestId>, SchedulerError> {
        let mut inner = self.inner.write();
        let mut orphans: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Processing)
            .cloned()
            .collect();
        if orphans.is_empty() {
            return Ok(Vec::new());
        }
        orphans.sort_by_key(|r| (r.queue_seq, r.submitted_at_ms));

        let count = i64::try_from(orphans.len()).unwrap_or(i64::MAX);
        let first_seq = inner.head_seq().saturating_sub(count);
        let mut requeued = Vec::with_capacity(orphans.len());
        for (seq, mut request) in (first_seq..).zip(orphans) {
            tracing::warn!(request_id = %request.id, "requeueing request orphaned in processing");
            request.status = RequestStatus::Queued;
            request.started_at_ms = None;
            request.queue_seq = seq;
            requeued.push(request.id);
            inner.commit(request)?;
        }
        inner.processing = None;
        Ok(requeued)
    }

    /// Fetch a request by id.
    pub fn get(&self, id: RequestId) -> Option<Request> {
        self.inner.read().requests.get(&id).cloned()
    }

    /// Number of queued requests.
    pub fn queue_length(&self) -> usize {
        self.inner.read().queued.len()
    }

    /// The request currently processing, if any.
    pub fn processing(&self) -> Option<Request> {
        let inner = self.inner.read();
        inner.processing.and_then(|id| inner.requests.get(&id).cloned())
    }

    /// Ordered snapshot of queued requests, head first.
    pub fn queued(&self) -> Vec<Request> {
        let inner = self.inner.read();
        inner
            .queued
            .values()
            .filter_map(|id| inner.requests.get(id).cloned())
            .collect()
    }

    /// Flush the backing store.
    pub fn flush(&self) -> Result<(), SchedulerError> {
        self.inner.write().store.flush()
    }
}
