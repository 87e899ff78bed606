//! Scripted operator and fault-injecting local backend.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use xfer_core::{
    AdapterOptions, ByteSink, ByteStream, FileSystemAdapter, FileSystemInterface, FsError, FsItem, FsResult,
    LastRequestSession, LocalOptions,
};
use xfer_local::LocalInterface;
use xfer_ops::{
    AdapterRegistry, ConfirmKind, ConfirmRequest, ConfirmResponse, Dialog, InputRequest, OperationSnapshot,
    Operations, OperationsConfig, Validator,
};

// ─── Operator ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedDialog {
    answers: Mutex<HashMap<ConfirmKind, ConfirmResponse>>,
    inputs: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<ConfirmRequest>>,
    pub input_requests: Mutex<Vec<InputRequest>>,
    pub reports: Mutex<Vec<OperationSnapshot>>,
    pub reloads: Mutex<Vec<Vec<String>>>,
}

impl ScriptedDialog {
    /// Every confirmation is declined until told otherwise.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, kind: ConfirmKind, response: ConfirmResponse) {
        self.answers.lock().unwrap().insert(kind, response);
    }

    pub fn type_in(&self, values: &[&str]) {
        self.inputs
            .lock()
            .unwrap()
            .extend(values.iter().map(|v| v.to_string()));
    }

    pub fn prompts_of(&self, kind: ConfirmKind) -> usize {
        self.prompts.lock().unwrap().iter().filter(|p| p.kind == kind).count()
    }

    /// Reload notifications arrive after the operation settles.
    pub async fn wait_for_reloads(&self, count: usize) -> Vec<Vec<String>> {
        for _ in 0..500 {
            let reloads = self.reloads.lock().unwrap().clone();
            if reloads.len() >= count {
                return reloads;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} reload notification(s)", count);
    }
}

#[async_trait]
impl Dialog for ScriptedDialog {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmResponse {
        let response = self
            .answers
            .lock()
            .unwrap()
            .get(&request.kind)
            .copied()
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(request);
        response
    }

    async fn input(&self, request: InputRequest, _validate: &Validator) -> Option<String> {
        self.input_requests.lock().unwrap().push(request);
        self.inputs.lock().unwrap().pop_front()
    }

    fn report_operation(&self, operation: &OperationSnapshot) {
        self.reports.lock().unwrap().push(operation.clone());
    }

    async fn reload_file_systems(&self, identifiers: &[String]) {
        self.reloads.lock().unwrap().push(identifiers.to_vec());
    }
}

// ─── Fault injection ─────────────────────────────────────────────────

/// Switches shared by every session of a [`HookedAdapter`].
#[derive(Default)]
pub struct Hooks {
    /// File names whose written bytes get flipped.
    pub corrupt: Mutex<HashSet<String>>,
    /// File names whose writes fail as lost connections.
    pub unreachable: Mutex<HashSet<String>>,
    /// Fail this many writes before letting them through.
    pub flaky_writes: AtomicUsize,
    /// Park every write until `release` is notified.
    pub hold: AtomicBool,
    pub release: Notify,
    pub writes_started: AtomicUsize,
    pub written: Mutex<Vec<String>>,
    pub sessions: AtomicUsize,
}

impl Hooks {
    pub fn corrupt(&self, name: &str) {
        self.corrupt.lock().unwrap().insert(name.to_string());
    }

    pub fn unreachable(&self, name: &str) {
        self.unreachable.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self) {
        self.unreachable.lock().unwrap().clear();
        self.corrupt.lock().unwrap().clear();
    }

    pub fn written_names(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|p| name_of(p))
            .collect()
    }

    pub async fn wait_for_writes(&self, count: usize) {
        for _ in 0..500 {
            if self.writes_started.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} write(s) to start", count);
    }
}

fn name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub struct HookedAdapter {
    options: AdapterOptions,
    session: LastRequestSession,
    pub hooks: Arc<Hooks>,
}

impl HookedAdapter {
    pub fn new(identifier: &str) -> Arc<Self> {
        Arc::new(Self {
            options: AdapterOptions::Local(LocalOptions {
                identifier: identifier.to_string(),
                name: None,
            }),
            session: LastRequestSession::new(),
            hooks: Arc::new(Hooks::default()),
        })
    }
}

#[async_trait]
impl FileSystemAdapter for HookedAdapter {
    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn path_separator(&self) -> char {
        std::path::MAIN_SEPARATOR
    }

    async fn create_interface(&self) -> FsResult<Arc<dyn FileSystemInterface>> {
        self.hooks.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(HookedInterface {
            inner: LocalInterface::new(self.identifier()),
            hooks: self.hooks.clone(),
        }))
    }

    fn last_request_session(&self) -> &LastRequestSession {
        &self.session
    }
}

pub struct HookedInterface {
    inner: LocalInterface,
    hooks: Arc<Hooks>,
}

#[async_trait]
impl FileSystemInterface for HookedInterface {
    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn path_separator(&self) -> char {
        self.inner.path_separator()
    }

    async fn list_entries(&self, dir: &str) -> FsResult<Vec<FsItem>> {
        self.inner.list_entries(dir).await
    }

    async fn is_directory(&self, path: &str) -> FsResult<bool> {
        self.inner.is_directory(path).await
    }

    async fn is_file(&self, path: &str) -> FsResult<bool> {
        self.inner.is_file(path).await
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        self.inner.exists(path).await
    }

    async fn file_info(&self, path: &str) -> FsResult<Option<FsItem>> {
        self.inner.file_info(path).await
    }

    async fn make_directory(&self, path: &str) -> FsResult<()> {
        self.inner.make_directory(path).await
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        self.inner.remove_file(path).await
    }

    async fn remove_directory(&self, path: &str) -> FsResult<()> {
        self.inner.remove_directory(path).await
    }

    async fn create_read_stream(&self, path: &str) -> FsResult<ByteStream> {
        self.inner.create_read_stream(path).await
    }

    async fn create_write_stream(&self, path: &str, size: Option<u64>) -> FsResult<Box<dyn ByteSink>> {
        let hooks = &self.hooks;
        hooks.writes_started.fetch_add(1, Ordering::SeqCst);
        if hooks.hold.load(Ordering::SeqCst) {
            hooks.release.notified().await;
        }
        let name = name_of(path);
        if hooks.unreachable.lock().unwrap().contains(&name) {
            return Err(FsError::connection_failed("link down").with_path(path));
        }
        let flaky = hooks
            .flaky_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(FsError::timeout("write timed out").with_path(path));
        }
        let corrupt = hooks.corrupt.lock().unwrap().contains(&name);
        hooks.written.lock().unwrap().push(path.to_string());
        let sink = self.inner.create_write_stream(path, size).await?;
        Ok(Box::new(HookedSink { inner: sink, corrupt }))
    }

    async fn destroy(&self) {
        self.inner.destroy().await;
    }
}

struct HookedSink {
    inner: Box<dyn ByteSink>,
    corrupt: bool,
}

#[async_trait]
impl ByteSink for HookedSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> FsResult<()> {
        if self.corrupt {
            let flipped: Vec<u8> = chunk.iter().map(|b| b ^ 0xff).collect();
            return self.inner.write_chunk(Bytes::from(flipped)).await;
        }
        self.inner.write_chunk(chunk).await
    }

    async fn finish(self: Box<Self>) -> FsResult<()> {
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) {
        self.inner.abort().await
    }
}

// ─── Wiring ──────────────────────────────────────────────────────────

pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub src: Arc<HookedAdapter>,
    pub dst: Arc<HookedAdapter>,
    pub dialog: Arc<ScriptedDialog>,
    pub ops: Operations,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let src = HookedAdapter::new("src");
        let dst = HookedAdapter::new("dst");
        let mut registry = AdapterRegistry::new();
        registry.insert(src.clone()).unwrap();
        registry.insert(dst.clone()).unwrap();
        let settings = OperationsConfig {
            info_directory: tmp.path().join("operations"),
            max_attempts: 2,
            iterations_count: 1,
            retry_backoff_ms: 0,
        };
        let dialog = ScriptedDialog::new();
        let ops = Operations::with_registry(registry, settings, dialog.clone());
        Self {
            tmp,
            src,
            dst,
            dialog,
            ops,
        }
    }

    /// Absolute path of `rel` inside the fixture directory.
    pub fn path(&self, rel: &str) -> String {
        self.tmp.path().join(rel).to_string_lossy().to_string()
    }

    pub fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.tmp.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.tmp.path().join(rel)).ok()
    }
}
