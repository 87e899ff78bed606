use super::{Confirmations, OperationKind, OperationSnapshot, OperationStatus, Stage, StageWeights};
use crate::config::OperationsConfig;
use crate::error::OpResult;
use crate::store::{OperationInfo, OperationStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{info, warn};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Called synchronously on every state change.
pub type StateListener = Arc<dyn Fn(&OperationSnapshot) + Send + Sync>;

/// The shared, memoized answer to an abort request.
pub type AbortDecision = Shared<BoxFuture<'static, bool>>;

pub struct OperationSetup {
    pub id: u64,
    pub uuid: Uuid,
    pub settings: OperationsConfig,
    pub confirmations: Arc<dyn Confirmations>,
    /// Present when the operation persists recovery state.
    pub store: Option<OperationStore>,
    pub listener: Option<StateListener>,
}

/// State and services shared between the runner and an operation body.
pub struct OperationContext {
    weak: Weak<OperationContext>,
    weights: StageWeights,
    pub(super) settings: OperationsConfig,
    pub(super) confirmations: Arc<dyn Confirmations>,
    store: Option<OperationStore>,
    listener: Option<StateListener>,
    token: CancellationToken,
    abort_decision: Mutex<Option<AbortDecision>>,
    state: Mutex<OperationSnapshot>,
    watch: watch::Sender<OperationSnapshot>,
}

impl OperationContext {
    pub(super) fn new(
        setup: OperationSetup,
        kind: OperationKind,
        weights: StageWeights,
        affected_file_systems: Vec<String>,
    ) -> Arc<Self> {
        let snapshot = OperationSnapshot {
            id: setup.id,
            uuid: setup.uuid,
            kind,
            status: OperationStatus::Waiting,
            aborting: false,
            progress: 0.0,
            last_log_line: None,
            fatal_error: None,
            affected_file_systems,
        };
        let (watch, _) = watch::channel(snapshot.clone());
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            weights,
            settings: setup.settings,
            confirmations: setup.confirmations,
            store: setup.store,
            listener: setup.listener,
            token: CancellationToken::new(),
            abort_decision: Mutex::new(None),
            state: Mutex::new(snapshot),
            watch,
        })
    }

    pub fn id(&self) -> u64 {
        self.lock().id
    }

    pub fn uuid(&self) -> Uuid {
        self.lock().uuid
    }

    pub fn kind(&self) -> OperationKind {
        self.lock().kind
    }

    pub fn settings(&self) -> &OperationsConfig {
        &self.settings
    }

    pub fn confirmations(&self) -> &Arc<dyn Confirmations> {
        &self.confirmations
    }

    /// An owning handle for callbacks that must outlive a borrow.
    pub fn handle(&self) -> Option<Arc<OperationContext>> {
        self.weak.upgrade()
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        self.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationSnapshot> {
        self.watch.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OperationSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, apply: impl FnOnce(&mut OperationSnapshot) -> bool) {
        let snapshot = {
            let mut state = self.lock();
            if !apply(&mut state) {
                return;
            }
            let snapshot = state.clone();
            self.watch.send_replace(snapshot.clone());
            snapshot
        };
        if let Some(listener) = &self.listener {
            listener(&snapshot);
        }
    }

    // ── Status and log ───────────────────────────────────────────

    pub(super) fn set_status(&self, status: OperationStatus) {
        self.update(|s| {
            s.status = status;
            true
        });
    }

    pub(super) fn finish(&self, status: OperationStatus, fatal_error: Option<String>) {
        self.update(|s| {
            s.status = status;
            s.aborting = false;
            if status == OperationStatus::Done {
                s.progress = 1.0;
            }
            s.fatal_error = fatal_error;
            true
        });
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("[operation {}] {}", self.id(), line);
        self.update(|s| {
            s.last_log_line = Some(line);
            true
        });
    }

    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        warn!("[operation {}] {}", self.id(), line);
        self.update(|s| {
            s.last_log_line = Some(line);
            true
        });
    }

    // ── Progress ─────────────────────────────────────────────────

    /// Map a stage-local `ratio` onto the global scale. Progress never
    /// moves backwards.
    pub fn report_stage_percentage(&self, stage: Stage, ratio: f64) {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let (start, weight) = self.weights.span(stage);
        let global = (start + weight * ratio).clamp(0.0, 1.0);
        self.update(|s| {
            if global > s.progress {
                s.progress = global;
                true
            } else {
                false
            }
        });
    }

    // ── Abort ────────────────────────────────────────────────────

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to byte pumps so confirmed aborts release streams.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(super) fn abort(&self) -> AbortDecision {
        if self.is_aborted() {
            return futures::future::ready(true).boxed().shared();
        }
        if self.snapshot().status.is_terminal() {
            return futures::future::ready(false).boxed().shared();
        }
        let mut memo = self.abort_decision.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = memo.as_ref() {
            return pending.clone();
        }
        let weak = self.weak.clone();
        let decision = async move {
            let Some(ctx) = weak.upgrade() else {
                return false;
            };
            ctx.update(|s| {
                s.aborting = true;
                true
            });
            let confirmed = ctx.confirmations.confirm_abort(&ctx.snapshot()).await;
            ctx.update(|s| {
                s.aborting = false;
                true
            });
            if confirmed {
                ctx.token.cancel();
                ctx.log("abort confirmed");
            }
            *ctx.abort_decision.lock().unwrap_or_else(|e| e.into_inner()) = None;
            confirmed
        }
        .boxed()
        .shared();
        *memo = Some(decision.clone());
        decision
    }

    // ── Persistence ──────────────────────────────────────────────

    pub fn is_persisted(&self) -> bool {
        self.store.is_some()
    }

    pub async fn save_info(&self, info: &OperationInfo) -> OpResult<()> {
        match &self.store {
            Some(store) => store.save_info(self.uuid(), info).await,
            None => Ok(()),
        }
    }

    /// Append one finished key to the recovery log, if there is one.
    pub async fn record_completed(&self, key: &str) -> OpResult<()> {
        match &self.store {
            Some(store) => store.append_completed(self.uuid(), key).await,
            None => Ok(()),
        }
    }

    pub(super) async fn forget(&self) -> OpResult<()> {
        match &self.store {
            Some(store) => store.remove(self.uuid()).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::setup;
    use super::*;
    use async_trait::async_trait;
    use crate::error::OperationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn context(setup: OperationSetup) -> Arc<OperationContext> {
        OperationContext::new(setup, OperationKind::Copy, StageWeights::default(), vec![])
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let ctx = context(setup(true));
        let mut last = 0.0;
        for stage in [Stage::Before, Stage::Invoke, Stage::After, Stage::CleanUp] {
            for step in 0..=10 {
                ctx.report_stage_percentage(stage, step as f64 / 10.0);
                let p = ctx.snapshot().progress;
                assert!(p >= last && p <= 1.0, "{} after {}", p, last);
                last = p;
            }
        }
        assert!((last - 1.0).abs() < 1e-9);

        ctx.report_stage_percentage(Stage::Before, 0.0);
        ctx.report_stage_percentage(Stage::Invoke, 7.0);
        ctx.report_stage_percentage(Stage::Invoke, f64::NAN);
        assert!((ctx.snapshot().progress - last).abs() < 1e-9);
    }

    #[test]
    fn listener_sees_every_change() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut s = setup(true);
        s.listener = Some(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let ctx = context(s);
        ctx.log("one");
        ctx.report_stage_percentage(Stage::Invoke, 0.5);
        ctx.report_stage_percentage(Stage::Invoke, 0.4);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.snapshot().last_log_line.as_deref(), Some("one"));
    }

    struct SlowAbort {
        asked: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl Confirmations for SlowAbort {
        async fn confirm_abort(&self, operation: &OperationSnapshot) -> bool {
            assert!(operation.aborting);
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            true
        }
        async fn confirm_retry(&self, _: &OperationSnapshot, _: &OperationError) -> bool {
            false
        }
        async fn confirm_overwrite(&self, _: &OperationSnapshot, _: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn abort_decision_is_shared_while_pending() {
        let confirmations = Arc::new(SlowAbort {
            asked: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let mut s = setup(true);
        s.confirmations = confirmations.clone();
        let ctx = context(s);

        let first = tokio::spawn(ctx.abort());
        let second = tokio::spawn(ctx.abort());
        while confirmations.asked.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        confirmations.release.notify_one();

        assert!(first.await.unwrap());
        assert!(second.await.unwrap());
        assert_eq!(confirmations.asked.load(Ordering::SeqCst), 1);
        assert!(ctx.is_aborted());
        assert!(!ctx.snapshot().aborting);
        assert!(ctx.abort().await);
    }

    #[tokio::test]
    async fn declined_abort_can_be_asked_again() {
        let ctx = context(setup(false));
        assert!(!ctx.abort().await);
        assert!(!ctx.is_aborted());
        assert!(!ctx.abort().await);
    }
}
