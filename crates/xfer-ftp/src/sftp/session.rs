//! Blocking SSH/SFTP session built on `ssh2`.
//!
//! Everything here blocks; callers run it on the blocking pool.

use log::{debug, info};
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use xfer_core::{FsError, FsErrorKind, FsResult, FtpOptions};

/// Server-alive probe interval, in seconds.
const KEEPALIVE_SECS: u32 = 30;

// libssh2 SFTP status codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_CONNECTION: i32 = 6;
const FX_CONNECTION_LOST: i32 = 7;
const FX_OP_UNSUPPORTED: i32 = 8;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_FILE_ALREADY_EXISTS: i32 = 11;

// libssh2 session error codes
const ERROR_TIMEOUT: i32 = -9;
const ERROR_AUTHENTICATION_FAILED: i32 = -18;
const ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// Translate an `ssh2` error, attaching `path` when one is known.
pub fn map_ssh_error(e: ssh2::Error, path: Option<&str>) -> FsError {
    let kind = match e.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => FsErrorKind::NotFound,
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => FsErrorKind::PermissionDenied,
        ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => FsErrorKind::Conflict,
        ErrorCode::SFTP(FX_NO_CONNECTION) | ErrorCode::SFTP(FX_CONNECTION_LOST) => FsErrorKind::Disconnected,
        ErrorCode::SFTP(FX_OP_UNSUPPORTED) => FsErrorKind::Unsupported,
        ErrorCode::SFTP(_) => FsErrorKind::Io,
        ErrorCode::Session(ERROR_TIMEOUT) => FsErrorKind::Timeout,
        ErrorCode::Session(ERROR_AUTHENTICATION_FAILED) | ErrorCode::Session(ERROR_PUBLICKEY_UNVERIFIED) => {
            FsErrorKind::AuthFailed
        }
        ErrorCode::Session(_) => FsErrorKind::Disconnected,
    };
    let err = FsError::new(kind, e.message().to_string());
    match path {
        Some(p) => err.with_path(p),
        None => err,
    }
}

pub struct SftpSession {
    // `sftp` is declared before `session` so the channel closes first.
    sftp: Sftp,
    session: Session,
    home: Option<String>,
    last_activity: Instant,
}

impl SftpSession {
    pub fn connect(options: &FtpOptions) -> FsResult<Self> {
        let host = options.host();
        let port = options.effective_port();
        let connect_timeout = Duration::from_secs(options.connect_timeout_secs);

        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| FsError::connection_failed(format!("resolve {}:{}: {}", host, port, e)))?
            .collect();
        let mut last_err = None;
        let mut tcp = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| {
            let reason = last_err.map_or_else(|| "no addresses".to_string(), |e| e.to_string());
            FsError::connection_failed(format!("connect to {}:{}: {}", host, port, reason))
        })?;

        let mut session = Session::new().map_err(|e| map_ssh_error(e, None))?;
        session.set_timeout((options.data_timeout_secs * 1000).min(u64::from(u32::MAX)) as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| {
            FsError::connection_failed(format!("SSH handshake with {}: {}", host, e.message()))
        })?;

        let user = options.user.as_deref().unwrap_or("anonymous");
        session
            .userauth_password(user, options.password.as_deref().unwrap_or(""))
            .map_err(|e| FsError::auth_failed(format!("login as '{}' failed: {}", user, e.message())))?;
        if !session.authenticated() {
            return Err(FsError::auth_failed(format!("login as '{}' was not accepted", user)));
        }
        session.set_keepalive(true, KEEPALIVE_SECS);

        let sftp = session.sftp().map_err(|e| map_ssh_error(e, None))?;
        let home = sftp
            .realpath(Path::new("."))
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        info!("SFTP connected to {}:{} as {} (home {:?})", host, port, user, home);

        Ok(Self {
            sftp,
            session,
            home,
            last_activity: Instant::now(),
        })
    }

    pub fn sftp(&mut self) -> &Sftp {
        self.last_activity = Instant::now();
        &self.sftp
    }

    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Send a keepalive; `false` when the server is gone.
    pub fn probe(&mut self) -> bool {
        self.last_activity = Instant::now();
        self.session.keepalive_send().is_ok() && self.sftp.stat(Path::new(".")).is_ok()
    }

    pub fn disconnect(self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!("SFTP disconnect: {}", e);
        }
    }
}

/// Whether a stat describes a directory.
pub fn stat_is_dir(stat: &FileStat) -> bool {
    stat.is_dir()
}

pub fn stat_is_symlink(stat: &FileStat) -> bool {
    stat.perm.map_or(false, |mode| mode & 0o170000 == 0o120000)
}
