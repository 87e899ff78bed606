//! # xfer-core
//!
//! Backend-neutral contracts for the transfer engine: the
//! [`FileSystemInterface`] session trait, the [`FileSystemAdapter`]
//! factory trait, path algebra, the byte pump and xxh64 checksums.

pub mod abortable;
pub mod adapter;
pub mod checksum;
pub mod error;
pub mod interface;
pub mod last_request;
pub mod log_throttle;
pub mod path;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

pub use adapter::{FileSystemAdapter, LastRequestSession};
pub use error::{FsError, FsErrorKind, FsResult};
pub use interface::{
    pump, ByteSink, ByteStream, FileSystemInterface, ProgressCallback, WriteOptions, WriteSource,
};
pub use last_request::LastRequestSlot;
pub use log_throttle::CoalescedLog;
pub use types::{
    AdapterOptions, AdapterType, FsItem, FtpOptions, FtpProtocol, LocalOptions, WebdavOptions,
};

pub use tokio_util::sync::CancellationToken;
