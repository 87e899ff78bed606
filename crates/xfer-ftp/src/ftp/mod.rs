//! FTP and FTPS over a single control connection.

pub mod client;
pub mod interface;
pub mod parser;
pub mod protocol;
pub mod tls;
pub mod transfer;

pub use client::FtpClient;
pub use interface::FtpInterface;
