use crate::error::OpResult;
use crate::operation::{Connections, OperationBody, OperationContext, OperationKind, Role};
use crate::store::{DirectoryInfo, OperationInfo, INFO_VERSION};
use async_trait::async_trait;
use std::sync::Arc;
use xfer_core::FileSystemAdapter;

/// Creates a single directory. Name validation happens before this runs.
pub struct CreateDirectoryOperation {
    source: String,
    path: String,
    connections: Connections,
}

impl CreateDirectoryOperation {
    pub fn new(source: Arc<dyn FileSystemAdapter>, path: impl Into<String>) -> Self {
        Self {
            source: source.identifier().to_string(),
            path: path.into(),
            connections: Connections::source_only(source),
        }
    }

    pub fn from_info(source: Arc<dyn FileSystemAdapter>, info: DirectoryInfo) -> Self {
        Self::new(source, info.path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl OperationBody for CreateDirectoryOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Directory
    }

    fn affected_file_systems(&self) -> Vec<String> {
        self.connections.identifiers()
    }

    async fn before(&mut self, ctx: &OperationContext) -> OpResult<()> {
        if ctx.is_persisted() {
            ctx.save_info(&OperationInfo::Directory(DirectoryInfo {
                version: INFO_VERSION,
                source: self.source.clone(),
                path: self.path.clone(),
            }))
            .await?;
        }
        Ok(())
    }

    async fn invoke(&mut self, ctx: &OperationContext) -> OpResult<()> {
        let this = &*self;
        ctx.retry(&this.connections, || async move {
            let fs = this.connections.get(Role::Source).await?;
            fs.create_directory(&this.path).await?;
            Ok(())
        })
        .await?;
        ctx.log(format!("created {}", self.path));
        Ok(())
    }

    async fn clean_up(&mut self, _ctx: &OperationContext) -> OpResult<()> {
        self.connections.destroy().await;
        Ok(())
    }
}
