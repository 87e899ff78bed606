//! Copy and move between any two adapters.
//!
//! `before` flattens the requested elements into a list of
//! [`CopyMoveElementInfo`]; `invoke` walks that list in passes until every
//! entry is resolved; for a move, `after` deletes the requested sources
//! once the whole copy succeeded.

use crate::claims::DestinationClaims;
use crate::error::{OpResult, OperationError};
use crate::operation::{
    Connections, OperationBody, OperationContext, OperationKind, ProgressSlice, Role, Stage, StageWeights,
};
use crate::store::{CopyMoveElementInfo, OperationInfo, TransferInfo, INFO_VERSION};
use async_trait::async_trait;
use log::Level;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use xfer_core::abortable::abortable;
use xfer_core::path::{normalize, with_trailing_separator};
use xfer_core::{
    CancellationToken, CoalescedLog, FileSystemAdapter, FileSystemInterface, FsError, ProgressCallback,
    WriteOptions, WriteSource,
};

/// What to transfer, where.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub source: String,
    pub elements: Vec<String>,
    pub destination: String,
    pub destination_path: String,
    /// A single element whose destination is `destination_path` itself.
    pub direct: bool,
}

#[derive(Default)]
struct CopyState {
    completed: HashSet<String>,
    skipped: HashSet<String>,
    created_directories: HashSet<String>,
    /// Per-destination overwrite decision, asked at most once.
    overwrite: HashMap<String, bool>,
}

pub struct CopyOperation {
    kind: OperationKind,
    request: TransferRequest,
    connections: Connections,
    claims: Arc<DestinationClaims>,
    iterations_count: u32,
    list: Vec<CopyMoveElementInfo>,
    recovered: bool,
    state: Mutex<CopyState>,
}

impl CopyOperation {
    /// `kind` is [`OperationKind::Copy`] or [`OperationKind::Move`].
    pub fn new(
        kind: OperationKind,
        request: TransferRequest,
        source: Arc<dyn FileSystemAdapter>,
        destination: Arc<dyn FileSystemAdapter>,
        claims: Arc<DestinationClaims>,
        iterations_count: u32,
    ) -> Self {
        Self {
            kind,
            request,
            connections: Connections::transfer(source, destination),
            claims,
            iterations_count,
            list: Vec::new(),
            recovered: false,
            state: Mutex::new(CopyState::default()),
        }
    }

    /// Resume from persisted state; `before` keeps the stored list.
    pub fn recover(
        kind: OperationKind,
        info: TransferInfo,
        completed: HashSet<String>,
        source: Arc<dyn FileSystemAdapter>,
        destination: Arc<dyn FileSystemAdapter>,
        claims: Arc<DestinationClaims>,
        iterations_count: u32,
    ) -> Self {
        let request = TransferRequest {
            source: info.source,
            elements: info.elements,
            destination: info.destination,
            destination_path: info.destination_path,
            direct: info.direct,
        };
        let mut op = Self::new(kind, request, source, destination, claims, iterations_count);
        op.list = info.list;
        op.recovered = true;
        op.state.get_mut().unwrap_or_else(|e| e.into_inner()).completed = completed;
        op
    }

    pub fn list(&self) -> &[CopyMoveElementInfo] {
        &self.list
    }

    pub fn completed(&self) -> HashSet<String> {
        self.state().completed.clone()
    }

    fn state(&self) -> MutexGuard<'_, CopyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn info(&self) -> OperationInfo {
        let info = TransferInfo {
            version: INFO_VERSION,
            source: self.request.source.clone(),
            destination: self.request.destination.clone(),
            elements: self.request.elements.clone(),
            destination_path: self.request.destination_path.clone(),
            list: self.list.clone(),
            direct: self.request.direct,
        };
        match self.kind {
            OperationKind::Move => OperationInfo::Move(info),
            _ => OperationInfo::Copy(info),
        }
    }

    fn is_resolved(&self, state: &CopyState, item: &CopyMoveElementInfo) -> bool {
        if item.is_directory {
            state.created_directories.contains(&item.to) || state.completed.contains(&item.from)
        } else {
            state.completed.contains(&item.from) || state.skipped.contains(&item.from)
        }
    }

    // ── before ───────────────────────────────────────────────────

    /// Depth-first flattening of every requested element.
    async fn expand(&self, ctx: &OperationContext) -> OpResult<Vec<CopyMoveElementInfo>> {
        let source = self.connections.get(Role::Source).await?;
        let destination = self.connections.get(Role::Destination).await?;
        let dsep = destination.path_separator();
        let mut list = Vec::new();

        for element in &self.request.elements {
            let name = source.file_name(element);
            let root_to = if self.request.direct {
                self.request.destination_path.clone()
            } else {
                let name = name.as_deref().ok_or_else(|| {
                    OperationError::from(FsError::invalid_config("cannot copy a root").with_path(element.as_str()))
                })?;
                destination.join_path(&self.request.destination_path, name)
            };

            let is_directory = source.is_directory(element).await?;
            let size = if is_directory {
                None
            } else if source.exists(element).await? {
                source.file_info(element).await?.and_then(|i| i.size)
            } else {
                return Err(FsError::not_found("nothing to copy").with_path(element.as_str()).into());
            };

            let mut stack = vec![CopyMoveElementInfo {
                name: name.unwrap_or_else(|| element.clone()),
                from: element.clone(),
                to: root_to,
                is_directory,
                is_file: !is_directory,
                size,
            }];
            while let Some(mut entry) = stack.pop() {
                if ctx.is_aborted() {
                    return Err(OperationError::Aborted);
                }
                if !entry.is_directory {
                    list.push(entry);
                    continue;
                }
                let children = source.list(&entry.from).await?;
                for child in children.into_iter().rev().filter(|c| !c.is_back_link()) {
                    if child.is_directory && child.is_symlink() {
                        ctx.warn(format!("not following directory link {}", child.path));
                        continue;
                    }
                    stack.push(CopyMoveElementInfo {
                        to: destination.join_path(&entry.to, &child.name),
                        name: child.name,
                        from: child.path,
                        is_directory: child.is_directory,
                        is_file: child.is_file,
                        size: child.size,
                    });
                }
                entry.to = with_trailing_separator(dsep, &entry.to);
                list.push(entry);
            }
        }
        Ok(list)
    }

    fn check_duplicates(&self, sep: char) -> OpResult<()> {
        let mut seen = HashSet::new();
        for item in &self.list {
            if !seen.insert(normalize(sep, &item.to)) {
                return Err(OperationError::Conflict(format!(
                    "{} is the destination of more than one entry",
                    item.to
                )));
            }
        }
        Ok(())
    }

    // ── invoke ───────────────────────────────────────────────────

    async fn process(&self, ctx: &OperationContext, item: &CopyMoveElementInfo, slice: ProgressSlice) -> OpResult<()> {
        if item.is_directory {
            ctx.try_perform(&self.connections, &item.from, move |_| async move {
                let destination = self.connections.get(Role::Destination).await?;
                self.ensure_directory(destination.as_ref(), &item.to).await
            })
            .await?;
            self.state().created_directories.insert(item.to.clone());
            return Ok(());
        }

        if let Err(owner) = self.claims.claim(&self.request.destination, &item.to, ctx.id()) {
            return Err(OperationError::Conflict(format!(
                "{} is being written by operation {}",
                item.to, owner
            )));
        }

        let written = ctx
            .try_perform(&self.connections, &item.from, move |_| self.copy_file(ctx, item, slice))
            .await?;
        if written {
            if self.state().completed.insert(item.from.clone()) {
                ctx.record_completed(&item.from).await?;
            }
        } else {
            self.state().skipped.insert(item.from.clone());
            ctx.log(format!("skipped {}", item.to));
        }
        Ok(())
    }

    /// `Ok(false)` when the operator chose to keep an existing file.
    async fn copy_file(&self, ctx: &OperationContext, item: &CopyMoveElementInfo, slice: ProgressSlice) -> OpResult<bool> {
        let source = self.connections.get(Role::Source).await?;
        let destination = self.connections.get(Role::Destination).await?;

        if !self.should_write(ctx, destination.as_ref(), &item.to).await? {
            return Ok(false);
        }
        if let Some(parent) = destination.parent_path(&item.to) {
            self.ensure_directory(destination.as_ref(), &parent).await?;
        }

        let size = match item.size {
            Some(size) => Some(size),
            None => source.file_info(&item.from).await?.and_then(|i| i.size),
        };
        let reader = source.create_read_stream(&item.from).await?;
        let options = WriteOptions::overwrite()
            .with_size(size)
            .with_progress(progress_reporter(ctx, &item.from, slice))
            .with_abort(ctx.token());
        destination
            .write_file(&item.to, WriteSource::Stream(reader), options)
            .await?;

        verify(source.as_ref(), destination.as_ref(), item, &ctx.token()).await?;
        Ok(true)
    }

    async fn should_write(&self, ctx: &OperationContext, destination: &dyn FileSystemInterface, to: &str) -> OpResult<bool> {
        if let Some(decision) = self.state().overwrite.get(to) {
            return Ok(*decision);
        }
        let decision = if destination.exists(to).await? {
            ctx.confirmations().confirm_overwrite(&ctx.snapshot(), to).await
        } else {
            true
        };
        self.state().overwrite.insert(to.to_string(), decision);
        Ok(decision)
    }

    /// Create `dir` and any missing ancestors.
    async fn ensure_directory(&self, destination: &dyn FileSystemInterface, dir: &str) -> OpResult<()> {
        let sep = destination.path_separator();
        let mut missing = Vec::new();
        let mut cursor = Some(normalize(sep, dir));
        while let Some(current) = cursor {
            let known = self
                .state()
                .created_directories
                .contains(&with_trailing_separator(sep, &current));
            if known || destination.is_directory(&current).await? {
                break;
            }
            cursor = destination.parent_path(&current);
            missing.push(current);
        }
        for dir in missing.into_iter().rev() {
            destination.create_directory(&dir).await?;
            self.state()
                .created_directories
                .insert(with_trailing_separator(sep, &dir));
        }
        Ok(())
    }

    /// Whether any file under `element` was skipped.
    fn has_skipped_below(&self, sep: char, element: &str) -> bool {
        let prefix = with_trailing_separator(sep, element);
        self.state()
            .skipped
            .iter()
            .any(|from| from == element || from.starts_with(&prefix))
    }
}

fn progress_reporter(ctx: &OperationContext, from: &str, slice: ProgressSlice) -> ProgressCallback {
    let handle = ctx.handle();
    let from = from.to_string();
    let log = Mutex::new(CoalescedLog::per_second(Level::Debug));
    Arc::new(move |done, total| {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        if let Some(ctx) = &handle {
            ctx.report_slice(&slice, done as f64 / total as f64);
        }
        if let Ok(mut log) = log.lock() {
            log.log(format!("{}: {} of {} bytes", from, done, total));
        }
    })
}

/// Post-write integrity check on both sides.
async fn verify(
    source: &dyn FileSystemInterface,
    destination: &dyn FileSystemInterface,
    item: &CopyMoveElementInfo,
    token: &CancellationToken,
) -> OpResult<()> {
    let expected = abortable(token, source.get_files_checksums(&[item.from.clone()])).await?;
    let actual = abortable(token, destination.get_files_checksums(&[item.to.clone()])).await?;
    match (expected.first().cloned().flatten(), actual.first().cloned().flatten()) {
        (Some(a), Some(b)) if a != b => Err(FsError::checksum_mismatch(format!(
            "{} ({}) and {} ({}) differ",
            item.from, a, item.to, b
        ))
        .with_path(item.to.as_str())
        .into()),
        (Some(_), Some(_)) => Ok(()),
        (Some(_), None) => Err(FsError::not_found("destination missing after write")
            .with_path(item.to.as_str())
            .into()),
        (None, _) => Err(FsError::not_found("source vanished during copy")
            .with_path(item.from.as_str())
            .into()),
    }
}

#[async_trait]
impl OperationBody for CopyOperation {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn weights(&self) -> StageWeights {
        match self.kind {
            OperationKind::Move => StageWeights::moving(),
            _ => StageWeights::default(),
        }
    }

    fn affected_file_systems(&self) -> Vec<String> {
        self.connections.identifiers()
    }

    async fn before(&mut self, ctx: &OperationContext) -> OpResult<()> {
        if self.recovered {
            let done = self.state().completed.len();
            ctx.log(format!("resuming {}: {} of {} entries already done", self.kind, done, self.list.len()));
            return Ok(());
        }
        let this = &*self;
        let list = ctx.retry(&this.connections, || this.expand(ctx)).await?;
        self.list = list;

        let sep = self.connections.get(Role::Destination).await?.path_separator();
        self.check_duplicates(sep)?;
        ctx.log(format!(
            "{} {} entr{} to {}:{}",
            self.kind,
            self.list.len(),
            if self.list.len() == 1 { "y" } else { "ies" },
            self.request.destination,
            self.request.destination_path
        ));
        if ctx.is_persisted() {
            ctx.save_info(&self.info()).await?;
        }
        Ok(())
    }

    async fn invoke(&mut self, ctx: &OperationContext) -> OpResult<()> {
        let total = self.list.len();
        let mut pass = 0u32;
        loop {
            let pending: Vec<usize> = {
                let state = self.state();
                (0..total).filter(|i| !self.is_resolved(&state, &self.list[*i])).collect()
            };
            if pending.is_empty() {
                return Ok(());
            }
            if pass > 0 {
                let outstanding = OperationError::Outstanding {
                    items: pending.iter().map(|i| self.list[*i].from.clone()).collect(),
                };
                if pass > self.iterations_count {
                    return Err(outstanding);
                }
                if !ctx.confirmations().confirm_retry(&ctx.snapshot(), &outstanding).await {
                    return Err(outstanding);
                }
                ctx.log(format!("pass {}: retrying {} entr(ies)", pass + 1, pending.len()));
                self.connections.reinitialize().await;
            }

            let from = (total - pending.len()) as f64 / total as f64;
            let this = &*self;
            let pending_ref = &pending;
            let outcome = ctx
                .iterate(Stage::Invoke, from, 1.0, pending.len(), move |i, slice| {
                    let item = this.list[pending_ref[i]].clone();
                    async move { this.process(ctx, &item, slice).await }
                })
                .await;
            if outcome.aborted {
                return Err(OperationError::Aborted);
            }
            for (i, e) in &outcome.failures {
                ctx.warn(format!("{}: {}", self.list[pending[*i]].from, e));
            }
            pass += 1;
        }
    }

    async fn after(&mut self, ctx: &OperationContext) -> OpResult<()> {
        if self.kind != OperationKind::Move {
            return Ok(());
        }
        let sep = self.connections.get(Role::Source).await?.path_separator();
        let elements = &self.request.elements;
        let this = &*self;
        let outcome = ctx
            .iterate(Stage::After, 0.0, 1.0, elements.len(), move |i, _| {
                let element = elements[i].clone();
                async move {
                    if this.has_skipped_below(sep, &element) {
                        ctx.log(format!("keeping {}: some entries were not overwritten", element));
                        return Ok(());
                    }
                    let element = element.as_str();
                    ctx.try_perform(&this.connections, element, move |_| async move {
                        let source = this.connections.get(Role::Source).await?;
                        source.remove(element).await.map_err(OperationError::from)
                    })
                    .await
                }
            })
            .await;
        if outcome.aborted {
            return Err(OperationError::Aborted);
        }
        if !outcome.failures.is_empty() {
            return Err(OperationError::Outstanding {
                items: outcome.failures.iter().map(|(i, _)| elements[*i].clone()).collect(),
            });
        }
        Ok(())
    }

    async fn clean_up(&mut self, ctx: &OperationContext) -> OpResult<()> {
        self.claims.release_all(ctx.id());
        self.connections.destroy().await;
        Ok(())
    }
}
