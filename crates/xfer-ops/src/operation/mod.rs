//! The staged operation engine.
//!
//! An [`Operation`] drives an [`OperationBody`] through
//! before → invoke → after → clean-up. Clean-up always runs; its failures
//! are logged and never replace the real outcome.

mod connections;
mod context;
mod primitives;

pub use connections::{Connections, Role};
pub use context::{AbortDecision, OperationContext, OperationSetup, StateListener};
pub use primitives::{Iteration, ProgressSlice};

use crate::error::{OpResult, OperationError};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Copy,
    Move,
    Directory,
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
            Self::Directory => write!(f, "directory"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Waiting,
    Pending,
    Done,
    Error,
    Aborted,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Before,
    Invoke,
    After,
    CleanUp,
}

/// Share of overall progress owned by each stage; the four sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageWeights {
    pub before: f64,
    pub invoke: f64,
    pub after: f64,
    pub clean_up: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            before: 0.01,
            invoke: 0.97,
            after: 0.01,
            clean_up: 0.01,
        }
    }
}

impl StageWeights {
    /// Move spends a real share of its time deleting sources.
    pub fn moving() -> Self {
        Self {
            before: 0.01,
            invoke: 0.80,
            after: 0.18,
            clean_up: 0.01,
        }
    }

    /// `(start, weight)` of `stage` on the global scale.
    pub fn span(&self, stage: Stage) -> (f64, f64) {
        match stage {
            Stage::Before => (0.0, self.before),
            Stage::Invoke => (self.before, self.invoke),
            Stage::After => (self.before + self.invoke, self.after),
            Stage::CleanUp => (self.before + self.invoke + self.after, self.clean_up),
        }
    }
}

/// What observers see of an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub id: u64,
    pub uuid: Uuid,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// An abort confirmation is on screen.
    pub aborting: bool,
    pub progress: f64,
    pub last_log_line: Option<String>,
    pub fatal_error: Option<String>,
    pub affected_file_systems: Vec<String>,
}

/// The operator decisions an operation may need mid-flight.
#[async_trait]
pub trait Confirmations: Send + Sync {
    async fn confirm_abort(&self, operation: &OperationSnapshot) -> bool;

    async fn confirm_retry(&self, operation: &OperationSnapshot, error: &OperationError) -> bool;

    async fn confirm_overwrite(&self, operation: &OperationSnapshot, destination: &str) -> bool;
}

/// The kind-specific part of an operation.
#[async_trait]
pub trait OperationBody: Send {
    fn kind(&self) -> OperationKind;

    fn weights(&self) -> StageWeights {
        StageWeights::default()
    }

    fn affected_file_systems(&self) -> Vec<String>;

    async fn before(&mut self, _ctx: &OperationContext) -> OpResult<()> {
        Ok(())
    }

    async fn invoke(&mut self, ctx: &OperationContext) -> OpResult<()>;

    async fn after(&mut self, _ctx: &OperationContext) -> OpResult<()> {
        Ok(())
    }

    async fn clean_up(&mut self, ctx: &OperationContext) -> OpResult<()>;
}

pub struct Operation {
    context: Arc<OperationContext>,
    body: Mutex<Box<dyn OperationBody>>,
}

impl Operation {
    pub fn new(setup: OperationSetup, body: Box<dyn OperationBody>) -> Arc<Self> {
        let context = OperationContext::new(setup, body.kind(), body.weights(), body.affected_file_systems());
        Arc::new(Self {
            context,
            body: Mutex::new(body),
        })
    }

    pub fn id(&self) -> u64 {
        self.context.id()
    }

    pub fn uuid(&self) -> Uuid {
        self.context.uuid()
    }

    pub fn context(&self) -> &Arc<OperationContext> {
        &self.context
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        self.context.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationSnapshot> {
        self.context.subscribe()
    }

    /// Ask to abort. Repeated calls while a decision is pending share it.
    pub fn abort(&self) -> AbortDecision {
        self.context.abort()
    }

    /// Drive the stages to a terminal status. Runs at most once.
    pub async fn run(&self) -> OperationSnapshot {
        let ctx = &self.context;
        let mut body = self.body.lock().await;
        if ctx.snapshot().status != OperationStatus::Waiting {
            return ctx.snapshot();
        }
        if ctx.is_aborted() {
            ctx.set_status(OperationStatus::Aborted);
            return ctx.snapshot();
        }

        ctx.set_status(OperationStatus::Pending);
        info!("operation {} ({}) started", ctx.id(), ctx.kind());
        let outcome = Self::run_stages(ctx, body.as_mut()).await;

        if let Err(e) = body.clean_up(ctx).await {
            warn!("operation {}: clean-up failed: {}", ctx.id(), e);
        }
        ctx.report_stage_percentage(Stage::CleanUp, 1.0);

        match outcome {
            Ok(()) => {
                if let Err(e) = ctx.forget().await {
                    warn!("operation {}: could not drop recovery state: {}", ctx.id(), e);
                }
                ctx.finish(OperationStatus::Done, None);
            }
            Err(e) if e.is_aborted() || ctx.is_aborted() => {
                ctx.finish(OperationStatus::Aborted, None);
            }
            Err(e) => {
                warn!("operation {} failed: {}", ctx.id(), e);
                ctx.finish(OperationStatus::Error, Some(e.to_string()));
            }
        }
        info!("operation {} finished: {:?}", ctx.id(), ctx.snapshot().status);
        ctx.snapshot()
    }

    async fn run_stages(ctx: &OperationContext, body: &mut dyn OperationBody) -> OpResult<()> {
        for stage in [Stage::Before, Stage::Invoke, Stage::After] {
            if ctx.is_aborted() {
                return Err(OperationError::Aborted);
            }
            ctx.report_stage_percentage(stage, 0.0);
            match stage {
                Stage::Before => body.before(ctx).await?,
                Stage::Invoke => body.invoke(ctx).await?,
                Stage::After => body.after(ctx).await?,
                Stage::CleanUp => {}
            }
            ctx.report_stage_percentage(stage, 1.0);
        }
        Ok(())
    }

    /// Resolve once the operation reaches a terminal status.
    pub async fn wait(&self) -> OperationSnapshot {
        let mut rx = self.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.status.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }
}
