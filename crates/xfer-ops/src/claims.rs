//! In-process ownership of destination paths by running operations.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct DestinationClaims {
    owners: Mutex<HashMap<(String, String), u64>>,
}

impl DestinationClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` on `adapter` for `operation`. Returns the owning
    /// operation's id when somebody else holds it.
    pub fn claim(&self, adapter: &str, path: &str, operation: u64) -> Result<(), u64> {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        let owner = owners
            .entry((adapter.to_string(), path.to_string()))
            .or_insert(operation);
        if *owner == operation {
            Ok(())
        } else {
            Err(*owner)
        }
    }

    pub fn release_all(&self, operation: u64) {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.retain(|_, owner| *owner != operation);
    }

    pub fn owner(&self, adapter: &str, path: &str) -> Option<u64> {
        let owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.get(&(adapter.to_string(), path.to_string())).copied()
    }
}
