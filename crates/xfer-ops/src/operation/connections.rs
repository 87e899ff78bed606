//! Live sessions an operation holds, one per role.
//!
//! Source and destination always get their own interface, even when both
//! roles point at the same adapter: backends like FTP serialize calls per
//! session, and a copy keeps a read stream open while it writes.

use crate::error::OpResult;
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;
use xfer_core::{FileSystemAdapter, FileSystemInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

struct Slot {
    role: Role,
    adapter: Arc<dyn FileSystemAdapter>,
    live: Mutex<Option<Arc<dyn FileSystemInterface>>>,
}

pub struct Connections {
    slots: Vec<Slot>,
}

impl Connections {
    pub fn source_only(source: Arc<dyn FileSystemAdapter>) -> Self {
        Self {
            slots: vec![Slot {
                role: Role::Source,
                adapter: source,
                live: Mutex::new(None),
            }],
        }
    }

    pub fn transfer(source: Arc<dyn FileSystemAdapter>, destination: Arc<dyn FileSystemAdapter>) -> Self {
        let mut connections = Self::source_only(source);
        connections.slots.push(Slot {
            role: Role::Destination,
            adapter: destination,
            live: Mutex::new(None),
        });
        connections
    }

    fn slot(&self, role: Role) -> &Slot {
        // Every constructor installs a source slot first.
        self.slots
            .iter()
            .find(|s| s.role == role)
            .unwrap_or(&self.slots[0])
    }

    pub fn adapter(&self, role: Role) -> &Arc<dyn FileSystemAdapter> {
        &self.slot(role).adapter
    }

    /// The role's interface, connecting on first use.
    pub async fn get(&self, role: Role) -> OpResult<Arc<dyn FileSystemInterface>> {
        let slot = self.slot(role);
        let mut live = slot.live.lock().await;
        if let Some(interface) = live.as_ref() {
            return Ok(interface.clone());
        }
        debug!("{}: opening {:?} session", slot.adapter.identifier(), role);
        let interface = slot.adapter.create_interface().await?;
        *live = Some(interface.clone());
        Ok(interface)
    }

    /// Drop every live session; the next `get` reconnects.
    pub async fn reinitialize(&self) {
        for slot in &self.slots {
            let stale = slot.live.lock().await.take();
            if let Some(interface) = stale {
                debug!("{}: closing {:?} session", slot.adapter.identifier(), slot.role);
                interface.destroy().await;
            }
        }
    }

    pub async fn destroy(&self) {
        self.reinitialize().await;
    }

    /// Distinct adapter identifiers, source first.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for slot in &self.slots {
            let id = slot.adapter.identifier().to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}
