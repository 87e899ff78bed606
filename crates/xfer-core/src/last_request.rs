//! "Latest wins" request supersession.

use crate::error::FsResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// At most one in-flight request per name; issuing a new one cancels the
/// previous. Superseded callers resolve to `Ok(None)`.
#[derive(Default)]
pub struct LastRequestSlot {
    inflight: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_ticket: AtomicU64,
}

impl LastRequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<T, F>(&self, name: &str, fut: F) -> FsResult<Option<T>>
    where
        F: Future<Output = FsResult<T>>,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((old_ticket, old)) = inflight.insert(name.to_string(), (ticket, token.clone())) {
                log::trace!("request '{}' #{} superseded by #{}", name, old_ticket, ticket);
                old.cancel();
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = fut => Some(r),
        };

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if inflight.get(name).map_or(false, |(t, _)| *t == ticket) {
                inflight.remove(name);
            }
        }

        match outcome {
            None => Ok(None),
            Some(r) => r.map(Some),
        }
    }

    /// Cancel every in-flight request.
    pub fn cancel_all(&self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        for (_, (_, token)) in inflight.drain() {
            token.cancel();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
