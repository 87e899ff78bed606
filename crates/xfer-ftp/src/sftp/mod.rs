//! SFTP over `ssh2` with password authentication.

pub mod interface;
pub mod session;

pub use interface::SftpInterface;
