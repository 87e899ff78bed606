//! # xfer-local
//!
//! The local disk backend. Blocking directory walks run on the blocking
//! pool; byte streams use `tokio::fs`.

pub mod adapter;
pub mod interface;

pub use adapter::LocalAdapter;
pub use interface::LocalInterface;
