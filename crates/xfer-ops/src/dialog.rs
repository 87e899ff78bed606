//! The operator-facing collaborator: confirmations, text input, progress
//! reports and view refreshes.

use crate::operation::OperationSnapshot;
use async_trait::async_trait;

/// What a confirmation is about, so scripted operators can answer by topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmKind {
    Abort,
    Retry,
    Overwrite,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmRequest {
    pub kind: ConfirmKind,
    pub message: String,
    pub ok: String,
    pub cancel: String,
    /// Offers a "remember my choice" style checkbox when set.
    pub checkbox_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfirmResponse {
    pub result: bool,
    pub checked: bool,
}

impl ConfirmResponse {
    pub fn yes() -> Self {
        Self {
            result: true,
            checked: false,
        }
    }

    pub fn no() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRequest {
    pub message: String,
    /// Why the previous answer was refused.
    pub error: Option<String>,
}

/// Returns a reason when the value is unacceptable.
pub type Validator = dyn Fn(&str) -> Option<String> + Send + Sync;

#[async_trait]
pub trait Dialog: Send + Sync {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmResponse;

    /// `None` when the operator cancels. Implementations should run
    /// `validate` before returning.
    async fn input(&self, request: InputRequest, validate: &Validator) -> Option<String>;

    /// Called on every state change of a submitted operation.
    fn report_operation(&self, operation: &OperationSnapshot);

    /// Views showing these file systems should be refreshed.
    async fn reload_file_systems(&self, identifiers: &[String]);
}

const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Syntactic checks for a new directory's leaf name.
pub fn validate_directory_name(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return Some("name must not be empty".to_string());
    }
    if name == "." || name == ".." {
        return Some(format!("'{}' is reserved", name));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c) || c.is_control()) {
        return Some(format!("name must not contain {:?}", c));
    }
    None
}
