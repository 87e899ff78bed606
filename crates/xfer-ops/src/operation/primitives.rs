//! Retry, bounded-attempt and iteration helpers shared by operation bodies.

use super::{Connections, OperationContext, Stage};
use crate::error::{OpResult, OperationError};
use std::future::Future;

/// A sub-range of one stage, assigned to a single item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSlice {
    pub stage: Stage,
    pub start: f64,
    pub end: f64,
}

impl ProgressSlice {
    /// Stage-local ratio for `fraction` of this slice.
    pub fn at(&self, fraction: f64) -> f64 {
        self.start + (self.end - self.start) * fraction.clamp(0.0, 1.0)
    }
}

/// Outcome of one pass over a list.
#[derive(Debug, Default)]
pub struct Iteration {
    /// Index and error of every element that failed.
    pub failures: Vec<(usize, OperationError)>,
    /// Elements that were started.
    pub visited: usize,
    pub aborted: bool,
}

impl OperationContext {
    /// Run `f`; on failure ask the operator whether to retry. Approval
    /// rebuilds the backend sessions and runs `f` again.
    pub async fn retry<T, F, Fut>(&self, connections: &Connections, mut f: F) -> OpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OpResult<T>>,
    {
        loop {
            let error = match f().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if error.is_aborted() {
                return Err(error);
            }
            if self.is_aborted() {
                return Err(OperationError::Aborted);
            }
            if !self.confirmations.confirm_retry(&self.snapshot(), &error).await {
                return Err(error);
            }
            self.log(format!("retrying after: {}", error));
            connections.reinitialize().await;
        }
    }

    /// Up to `max_attempts` tries of `f` for one item, with a backoff
    /// between tries. Errors that another attempt cannot fix end the item
    /// at once.
    pub async fn try_perform<T, F, Fut>(&self, connections: &Connections, label: &str, mut f: F) -> OpResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = OpResult<T>>,
    {
        let attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if self.is_aborted() {
                return Err(OperationError::Aborted);
            }
            let error = match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if error.is_aborted() {
                return Err(error);
            }
            if !error.is_retryable() || attempt >= attempts {
                self.warn(format!("{}: failed after {} attempt(s): {}", label, attempt, error));
                return Err(error);
            }
            self.warn(format!("{}: attempt {}/{} failed: {}", label, attempt, attempts, error));
            if error.is_connectivity() {
                connections.reinitialize().await;
            }
            let token = self.token();
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(OperationError::Aborted),
                _ = tokio::time::sleep(self.settings.retry_backoff()) => {}
            }
            attempt += 1;
        }
    }

    /// Sequential fold over `count` elements inside `[from, to]` of
    /// `stage`. Failures are collected, never propagated; the fold stops
    /// before the next element once an abort is confirmed.
    pub async fn iterate<F, Fut>(&self, stage: Stage, from: f64, to: f64, count: usize, mut f: F) -> Iteration
    where
        F: FnMut(usize, ProgressSlice) -> Fut,
        Fut: Future<Output = OpResult<()>>,
    {
        let mut outcome = Iteration::default();
        let step = if count == 0 { 0.0 } else { (to - from) / count as f64 };
        for index in 0..count {
            if self.is_aborted() {
                outcome.aborted = true;
                return outcome;
            }
            let slice = ProgressSlice {
                stage,
                start: from + step * index as f64,
                end: from + step * (index + 1) as f64,
            };
            outcome.visited += 1;
            if let Err(e) = f(index, slice).await {
                if e.is_aborted() {
                    outcome.aborted = true;
                    return outcome;
                }
                outcome.failures.push((index, e));
            }
            self.report_stage_percentage(stage, slice.end);
        }
        outcome.aborted = self.is_aborted();
        outcome
    }

    pub fn report_slice(&self, slice: &ProgressSlice, fraction: f64) {
        self.report_stage_percentage(slice.stage, slice.at(fraction));
    }
}
