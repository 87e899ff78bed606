//! # xfer-webdav
//!
//! WebDAV backend. Uploads are raw streaming PUTs fed through a bounded
//! channel; an optional side channel asks a companion API to fix ownership
//! of written paths, and an optional catalog flags object-storage mounts.

pub mod adapter;
pub mod client;
pub mod interface;
pub mod permissions;
pub mod storage;
pub mod xml;

pub use adapter::WebdavAdapter;
pub use client::WebDavClient;
pub use interface::WebdavInterface;
pub use permissions::PermissionSyncSettings;
