//! High-level entry point: turns verbs into wired, running operations and
//! keeps track of them.

use crate::claims::DestinationClaims;
use crate::config::{Configuration, OperationsConfig};
use crate::copy::{CopyOperation, TransferRequest};
use crate::create_directory::CreateDirectoryOperation;
use crate::dialog::{validate_directory_name, ConfirmKind, ConfirmRequest, Dialog, InputRequest};
use crate::error::{OpResult, OperationError};
use crate::operation::{
    AbortDecision, Confirmations, Operation, OperationBody, OperationKind, OperationSetup, OperationSnapshot,
    StateListener,
};
use crate::registry::AdapterRegistry;
use crate::remove::RemoveOperation;
use crate::store::{OperationInfo, OperationStore, TransferInfo};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;
use xfer_core::{FileSystemInterface, FsError};

// ─── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CreateDirectoryRequest {
    pub source: String,
    /// The parent directory, or the full new path when
    /// `is_new_directory_path` is set.
    pub source_path: String,
    pub is_new_directory_path: bool,
}

/// Receives the uuid under which a persisted operation is stored.
pub type OperationInfoCallback = Arc<dyn Fn(Uuid) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CopyRequest {
    pub source: String,
    pub source_elements: Vec<String>,
    pub destination: String,
    pub destination_path: String,
    pub direct: bool,
    pub save_operation_info: bool,
    pub operation_info_callback: Option<OperationInfoCallback>,
    /// Overrides `OperationsConfig::iterations_count`.
    pub iterations_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveRequest {
    pub source: String,
    pub source_elements: Vec<String>,
}

// ─── Dialog-backed confirmations ─────────────────────────────────────

/// Per-operation confirmations; an overwrite answer given with the
/// checkbox ticked sticks for the rest of the operation.
pub struct DialogConfirmations {
    dialog: Arc<dyn Dialog>,
    remembered_overwrite: Mutex<Option<bool>>,
}

impl DialogConfirmations {
    pub fn new(dialog: Arc<dyn Dialog>) -> Self {
        Self {
            dialog,
            remembered_overwrite: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Confirmations for DialogConfirmations {
    async fn confirm_abort(&self, operation: &OperationSnapshot) -> bool {
        self.dialog
            .confirm(ConfirmRequest {
                kind: ConfirmKind::Abort,
                message: format!("Abort the {} operation?", operation.kind),
                ok: "Abort".into(),
                cancel: "Continue".into(),
                checkbox_text: None,
            })
            .await
            .result
    }

    async fn confirm_retry(&self, operation: &OperationSnapshot, error: &OperationError) -> bool {
        self.dialog
            .confirm(ConfirmRequest {
                kind: ConfirmKind::Retry,
                message: format!("The {} operation failed: {}. Retry?", operation.kind, error),
                ok: "Retry".into(),
                cancel: "Cancel".into(),
                checkbox_text: None,
            })
            .await
            .result
    }

    async fn confirm_overwrite(&self, _operation: &OperationSnapshot, destination: &str) -> bool {
        let remembered = *self.remembered_overwrite.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(choice) = remembered {
            return choice;
        }
        let response = self
            .dialog
            .confirm(ConfirmRequest {
                kind: ConfirmKind::Overwrite,
                message: format!("{} already exists. Overwrite it?", destination),
                ok: "Overwrite".into(),
                cancel: "Skip".into(),
                checkbox_text: Some("Apply to all conflicts".into()),
            })
            .await;
        if response.checked {
            *self.remembered_overwrite.lock().unwrap_or_else(|e| e.into_inner()) = Some(response.result);
        }
        response.result
    }
}

// ─── Façade ──────────────────────────────────────────────────────────

pub struct Operations {
    registry: RwLock<Arc<AdapterRegistry>>,
    settings: RwLock<OperationsConfig>,
    dialog: Arc<dyn Dialog>,
    claims: Arc<DestinationClaims>,
    running: Arc<Mutex<HashMap<u64, Arc<Operation>>>>,
    next_id: AtomicU64,
}

impl Operations {
    pub fn new(configuration: &Configuration, dialog: Arc<dyn Dialog>) -> OpResult<Self> {
        configuration.validate()?;
        let registry = AdapterRegistry::from_options(&configuration.file_systems)?;
        Ok(Self::with_registry(registry, configuration.operations.clone(), dialog))
    }

    pub fn with_registry(registry: AdapterRegistry, settings: OperationsConfig, dialog: Arc<dyn Dialog>) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
            settings: RwLock::new(settings),
            dialog,
            claims: Arc::new(DestinationClaims::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn registry(&self) -> Arc<AdapterRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn settings(&self) -> OperationsConfig {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn store(&self) -> OperationStore {
        OperationStore::new(self.settings().info_directory)
    }

    /// Swap in a new configuration. Running operations keep the adapters
    /// they started with.
    pub async fn reload(&self, configuration: &Configuration) -> OpResult<()> {
        configuration.validate()?;
        let fresh = Arc::new(AdapterRegistry::from_options(&configuration.file_systems)?);
        let stale = std::mem::replace(&mut *self.registry.write().unwrap_or_else(|e| e.into_inner()), fresh);
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = configuration.operations.clone();
        stale.destroy().await;
        info!("configuration reloaded: {} file system(s)", configuration.file_systems.len());
        Ok(())
    }

    // ── Verbs ────────────────────────────────────────────────────

    /// `Ok(None)` when the operator cancels the name prompt.
    pub async fn create_directory(&self, request: CreateDirectoryRequest) -> OpResult<Option<Arc<Operation>>> {
        let adapter = self.registry().get(&request.source)?;
        let path = if request.is_new_directory_path {
            request.source_path
        } else {
            let fs = adapter.create_interface().await?;
            let prompted = self.prompt_directory_name(fs.as_ref(), &request.source_path).await;
            fs.destroy().await;
            match prompted? {
                Some(path) => path,
                None => return Ok(None),
            }
        };
        let body = CreateDirectoryOperation::new(adapter, path);
        Ok(Some(self.submit(Box::new(body), false, None, None)))
    }

    async fn prompt_directory_name(&self, fs: &dyn FileSystemInterface, parent: &str) -> OpResult<Option<String>> {
        let mut error = None;
        loop {
            let request = InputRequest {
                message: format!("Name of the new directory in {}", parent),
                error: error.take(),
            };
            let Some(name) = self.dialog.input(request, &validate_directory_name).await else {
                return Ok(None);
            };
            if let Some(reason) = validate_directory_name(&name) {
                error = Some(reason);
                continue;
            }
            let path = fs.join_path(parent, name.trim());
            if fs.exists(&path).await? {
                error = Some(format!("'{}' already exists", name.trim()));
                continue;
            }
            return Ok(Some(path));
        }
    }

    pub async fn copy(&self, request: CopyRequest) -> OpResult<Arc<Operation>> {
        self.transfer(OperationKind::Copy, request)
    }

    pub async fn move_(&self, request: CopyRequest) -> OpResult<Arc<Operation>> {
        self.transfer(OperationKind::Move, request)
    }

    fn transfer(&self, kind: OperationKind, request: CopyRequest) -> OpResult<Arc<Operation>> {
        if request.source_elements.is_empty() {
            return Err(FsError::invalid_config(format!("nothing to {}", kind)).into());
        }
        if request.direct && request.source_elements.len() != 1 {
            return Err(FsError::invalid_config("a direct transfer takes exactly one element").into());
        }
        let registry = self.registry();
        let source = registry.get(&request.source)?;
        let destination = registry.get(&request.destination)?;
        let iterations = request
            .iterations_count
            .unwrap_or_else(|| self.settings().iterations_count);
        let body = CopyOperation::new(
            kind,
            TransferRequest {
                source: request.source,
                elements: request.source_elements,
                destination: request.destination,
                destination_path: request.destination_path,
                direct: request.direct,
            },
            source,
            destination,
            self.claims.clone(),
            iterations,
        );
        let op = self.submit(Box::new(body), request.save_operation_info, None, Some(iterations));
        if let (true, Some(callback)) = (request.save_operation_info, &request.operation_info_callback) {
            callback(op.uuid());
        }
        Ok(op)
    }

    /// Asks before deleting; `Ok(None)` when declined.
    pub async fn remove(&self, request: RemoveRequest) -> OpResult<Option<Arc<Operation>>> {
        let adapter = self.registry().get(&request.source)?;
        if request.source_elements.is_empty() {
            return Err(FsError::invalid_config("nothing to remove").into());
        }
        let message = match request.source_elements.as_slice() {
            [only] => format!("Delete {}?", only),
            many => format!("Delete {} items?", many.len()),
        };
        let confirmed = self
            .dialog
            .confirm(ConfirmRequest {
                kind: ConfirmKind::Remove,
                message,
                ok: "Delete".into(),
                cancel: "Cancel".into(),
                checkbox_text: None,
            })
            .await
            .result;
        if !confirmed {
            debug!("removal of {:?} declined", request.source_elements);
            return Ok(None);
        }
        let body = RemoveOperation::new(adapter, request.source_elements);
        Ok(Some(self.submit(Box::new(body), false, None, None)))
    }

    /// Resume a persisted operation.
    pub async fn recover(&self, uuid: Uuid) -> OpResult<Arc<Operation>> {
        let (info, completed) = self.store().load(uuid).await?;
        let registry = self.registry();
        let iterations = self.settings().iterations_count;
        let body: Box<dyn OperationBody> = match info {
            OperationInfo::Copy(t) => self.recover_transfer(&registry, OperationKind::Copy, t, completed, iterations)?,
            OperationInfo::Move(t) => self.recover_transfer(&registry, OperationKind::Move, t, completed, iterations)?,
            OperationInfo::Directory(d) => Box::new(CreateDirectoryOperation::from_info(registry.get(&d.source)?, d)),
            OperationInfo::Remove(r) => Box::new(RemoveOperation::recover(registry.get(&r.source)?, r, completed)),
        };
        info!("recovering operation {}", uuid);
        Ok(self.submit(body, true, Some(uuid), None))
    }

    fn recover_transfer(
        &self,
        registry: &AdapterRegistry,
        kind: OperationKind,
        info: TransferInfo,
        completed: HashSet<String>,
        iterations: u32,
    ) -> OpResult<Box<dyn OperationBody>> {
        let source = registry.get(&info.source)?;
        let destination = registry.get(&info.destination)?;
        Ok(Box::new(CopyOperation::recover(
            kind,
            info,
            completed,
            source,
            destination,
            self.claims.clone(),
            iterations,
        )))
    }

    pub async fn recoverable(&self) -> OpResult<Vec<Uuid>> {
        self.store().list().await
    }

    // ── Tracking ─────────────────────────────────────────────────

    /// `None` when no operation with `id` is running.
    pub fn abort(&self, id: u64) -> Option<AbortDecision> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.get(&id).map(|op| op.abort())
    }

    pub fn get(&self, id: u64) -> Option<Arc<Operation>> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Snapshots of operations that have not finished yet.
    pub fn running(&self) -> Vec<OperationSnapshot> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<_> = running
            .values()
            .map(|op| op.snapshot())
            .filter(|s| !s.status.is_terminal())
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    pub async fn destroy(&self) {
        self.registry().destroy().await;
    }

    fn submit(
        &self,
        body: Box<dyn OperationBody>,
        persist: bool,
        uuid: Option<Uuid>,
        iterations: Option<u32>,
    ) -> Arc<Operation> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut settings = self.settings();
        if let Some(iterations) = iterations {
            settings.iterations_count = iterations;
        }
        let store = persist.then(|| OperationStore::new(settings.info_directory.clone()));
        let dialog = self.dialog.clone();
        let listener: StateListener = Arc::new(move |snapshot: &OperationSnapshot| dialog.report_operation(snapshot));
        let op = Operation::new(
            OperationSetup {
                id,
                uuid: uuid.unwrap_or_else(Uuid::new_v4),
                settings,
                confirmations: Arc::new(DialogConfirmations::new(self.dialog.clone())),
                store,
                listener: Some(listener),
            },
            body,
        );
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, op.clone());

        let runner = op.clone();
        let dialog = self.dialog.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            let done = runner.run().await;
            dialog.reload_file_systems(&done.affected_file_systems).await;
            running.lock().unwrap_or_else(|e| e.into_inner()).remove(&done.id);
        });
        op
    }
}
