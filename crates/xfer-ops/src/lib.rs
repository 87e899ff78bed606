//! # xfer-ops
//!
//! Staged, resumable operations on top of the transfer backends.
//!
//! Every verb builds an [`OperationBody`] and hands it to an [`Operation`],
//! which runs the `before`, `invoke`, `after` and `clean_up` stages,
//! reports weighted progress and honours operator aborts. Copy, move and
//! remove operations can persist their plan and completed keys through an
//! [`OperationStore`] and be resumed later with [`Operations::recover`].

pub mod claims;
pub mod config;
pub mod copy;
pub mod create_directory;
pub mod dialog;
pub mod error;
pub mod facade;
pub mod operation;
pub mod registry;
pub mod remove;
pub mod store;

pub use claims::DestinationClaims;
pub use config::{Configuration, OperationsConfig};
pub use copy::{CopyOperation, TransferRequest};
pub use create_directory::CreateDirectoryOperation;
pub use dialog::{
    validate_directory_name, ConfirmKind, ConfirmRequest, ConfirmResponse, Dialog, InputRequest, Validator,
};
pub use error::{OpResult, OperationError};
pub use facade::{
    CopyRequest, CreateDirectoryRequest, DialogConfirmations, OperationInfoCallback, Operations, RemoveRequest,
};
pub use operation::{
    AbortDecision, Confirmations, Operation, OperationBody, OperationContext, OperationKind, OperationSnapshot,
    OperationStatus, Stage, StageWeights,
};
pub use registry::{build_adapter, AdapterRegistry};
pub use remove::RemoveOperation;
pub use store::{
    CopyMoveElementInfo, DirectoryInfo, OperationInfo, OperationStore, RemoveInfo, TransferInfo, INFO_VERSION,
};
