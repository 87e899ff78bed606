//! # xfer-ftp
//!
//! FTP, FTPS and SFTP backends. FTP has no reliable stat, so metadata is
//! probed with `MLST` when offered and otherwise with `CWD`/`SIZE`/`MDTM`.
//! Sessions idle for a while are checked before use and replaced when the
//! server has gone away.

pub mod adapter;
pub mod ftp;
pub mod sftp;

pub use adapter::FtpAdapter;
pub use ftp::FtpInterface;
pub use sftp::SftpInterface;
