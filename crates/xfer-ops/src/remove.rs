//! Deleting elements from one adapter.

use crate::error::{OpResult, OperationError};
use crate::operation::{Connections, OperationBody, OperationContext, OperationKind, Role, Stage};
use crate::store::{OperationInfo, RemoveInfo, INFO_VERSION};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use xfer_core::FileSystemAdapter;

pub struct RemoveOperation {
    source: String,
    elements: Vec<String>,
    connections: Connections,
    recovered: bool,
    completed: Mutex<HashSet<String>>,
}

impl RemoveOperation {
    pub fn new(source: Arc<dyn FileSystemAdapter>, elements: Vec<String>) -> Self {
        Self {
            source: source.identifier().to_string(),
            elements,
            connections: Connections::source_only(source),
            recovered: false,
            completed: Mutex::new(HashSet::new()),
        }
    }

    pub fn recover(source: Arc<dyn FileSystemAdapter>, info: RemoveInfo, completed: HashSet<String>) -> Self {
        let mut op = Self::new(source, info.elements);
        op.recovered = true;
        op.completed = Mutex::new(completed);
        op
    }

    fn is_completed(&self, element: &str) -> bool {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(element)
    }

    async fn remove_one(&self, ctx: &OperationContext, element: &str) -> OpResult<()> {
        let recovered = self.recovered;
        ctx.try_perform(&self.connections, element, move |_| async move {
            let fs = self.connections.get(Role::Source).await?;
            match fs.remove(element).await {
                Ok(()) => Ok(()),
                // A resumed removal may find its element already gone.
                Err(e) if recovered && e.is_not_found() => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await?;
        let first = self
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(element.to_string());
        if first {
            ctx.record_completed(element).await?;
        }
        ctx.log(format!("removed {}", element));
        Ok(())
    }
}

#[async_trait]
impl OperationBody for RemoveOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Remove
    }

    fn affected_file_systems(&self) -> Vec<String> {
        self.connections.identifiers()
    }

    async fn before(&mut self, ctx: &OperationContext) -> OpResult<()> {
        if !self.recovered && ctx.is_persisted() {
            ctx.save_info(&OperationInfo::Remove(RemoveInfo {
                version: INFO_VERSION,
                source: self.source.clone(),
                elements: self.elements.clone(),
            }))
            .await?;
        }
        Ok(())
    }

    async fn invoke(&mut self, ctx: &OperationContext) -> OpResult<()> {
        let pending: Vec<&String> = self.elements.iter().filter(|e| !self.is_completed(e)).collect();
        let this = &*self;
        let pending_ref = &pending;
        let outcome = ctx
            .iterate(Stage::Invoke, 0.0, 1.0, pending.len(), move |i, _| {
                let element = pending_ref[i].clone();
                async move { this.remove_one(ctx, &element).await }
            })
            .await;
        if outcome.aborted {
            return Err(OperationError::Aborted);
        }
        if !outcome.failures.is_empty() {
            return Err(OperationError::Outstanding {
                items: outcome.failures.iter().map(|(i, _)| pending[*i].clone()).collect(),
            });
        }
        Ok(())
    }

    async fn clean_up(&mut self, _ctx: &OperationContext) -> OpResult<()> {
        self.connections.destroy().await;
        Ok(())
    }
}
