//! Stateful FTP client owning one control connection.
//!
//! Lifecycle: TCP (or implicit TLS) → banner → optional `AUTH TLS` +
//! `PBSZ 0` + `PROT P` → `USER`/`PASS` → `FEAT` → `OPTS UTF8 ON` → `TYPE I`.
//!
//! Any connectivity failure marks the client broken; the owning interface
//! replaces broken clients before the next call. So does a future dropped
//! between sending a command and reading its reply, since the control
//! channel is then out of step.

use crate::ftp::parser::{self, ListingEntry};
use crate::ftp::protocol::{FtpCodec, FtpReply};
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataChannel, DataStream};
use chrono::{DateTime, Utc};
use log::debug;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use xfer_core::abortable::with_timeout;
use xfer_core::{FsError, FsResult, FtpOptions, FtpProtocol};

/// Server capabilities advertised by `FEAT`.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub mlsd: bool,
    pub mlst: bool,
    pub size: bool,
    pub mdtm: bool,
    pub utf8: bool,
    pub raw: Vec<String>,
}

impl Features {
    fn from_reply(reply: &FtpReply) -> Self {
        let raw: Vec<String> = reply
            .lines
            .iter()
            .skip(1)
            .filter(|l| !l.starts_with(&reply.code.to_string()))
            .map(|l| l.trim().to_ascii_uppercase())
            .collect();
        let has = |feat: &str| raw.iter().any(|l| l.split_whitespace().next() == Some(feat));
        Self {
            mlsd: has("MLSD") || has("MLST"),
            mlst: has("MLST"),
            size: has("SIZE"),
            mdtm: has("MDTM"),
            utf8: has("UTF8"),
            raw,
        }
    }
}

pub struct FtpClient {
    codec: FtpCodec,
    host: String,
    peer: IpAddr,
    data_tls: Option<TlsConnector>,
    data_timeout: Duration,
    features: Features,
    epsv: bool,
    broken: bool,
    /// A command was sent and its reply has not been read.
    exchange_open: bool,
    /// A listing transfer started and its closing reply has not been read.
    listing_open: bool,
    last_activity: Instant,
}

impl FtpClient {
    pub async fn connect(options: &FtpOptions) -> FsResult<Self> {
        let host = options.host().to_string();
        if host.is_empty() {
            return Err(FsError::invalid_config("FTP host must not be empty"));
        }
        if options.protocol == FtpProtocol::Sftp {
            return Err(FsError::invalid_config("SFTP is not served by the FTP client"));
        }
        let port = options.effective_port();
        let connect_timeout = Duration::from_secs(options.connect_timeout_secs);
        let data_timeout = Duration::from_secs(options.data_timeout_secs);

        let tcp = with_timeout(connect_timeout, "FTP connect", async {
            TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| FsError::connection_failed(format!("connect to {}:{}: {}", host, port, e)))
        })
        .await?;
        tcp.set_nodelay(true).ok();
        let peer = tcp.peer_addr()?.ip();

        let connector = match options.protocol {
            FtpProtocol::Ftps | FtpProtocol::Ftpes => Some(tls::build_connector(options.ignore_certificate_errors)?),
            _ => None,
        };

        let mut codec = match (&options.protocol, &connector) {
            (FtpProtocol::Ftps, Some(connector)) => {
                let stream = with_timeout(connect_timeout, "TLS handshake", tls::connect(connector, &host, tcp)).await?;
                FtpCodec::from_tls(stream, data_timeout)
            }
            _ => FtpCodec::from_tcp(tcp, data_timeout),
        };
        codec.set_verbose(options.enable_logs);

        let banner = with_timeout(connect_timeout, "FTP greeting", codec.read_reply()).await?;
        if !banner.is_completion() {
            return Err(banner.into_error());
        }
        debug!("connected to {}:{} ({})", host, port, banner.message());

        if let (FtpProtocol::Ftpes, Some(connector)) = (&options.protocol, &connector) {
            let reply = codec.execute("AUTH TLS").await?;
            if !reply.is_completion() {
                return Err(FsError::connection_failed(format!("AUTH TLS rejected: {}", reply.message()))
                    .with_code(reply.code));
            }
            codec = tls::upgrade(codec, connector, &host).await?;
        }
        if codec.is_tls() {
            expect_completion(&mut codec, "PBSZ 0").await?;
            expect_completion(&mut codec, "PROT P").await?;
        }

        login(&mut codec, options).await?;

        let features = match codec.execute("FEAT").await? {
            reply if reply.is_completion() => Features::from_reply(&reply),
            _ => Features::default(),
        };
        if features.utf8 {
            codec.execute("OPTS UTF8 ON").await?;
        }
        expect_completion(&mut codec, "TYPE I").await?;

        Ok(Self {
            codec,
            host,
            peer,
            data_tls: connector,
            data_timeout,
            features,
            epsv: true,
            broken: false,
            exchange_open: false,
            listing_open: false,
            last_activity: Instant::now(),
        })
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn is_broken(&self) -> bool {
        self.broken || self.exchange_open || self.listing_open
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    // ─── Command plumbing ────────────────────────────────────────

    fn observe<T>(&mut self, result: FsResult<T>) -> FsResult<T> {
        self.last_activity = Instant::now();
        if let Err(e) = &result {
            if e.is_connectivity() {
                self.broken = true;
            }
        }
        result
    }

    fn ensure_in_step(&self) -> FsResult<()> {
        if self.broken || self.exchange_open {
            return Err(FsError::disconnected("control connection is closed"));
        }
        Ok(())
    }

    async fn execute(&mut self, cmd: &str) -> FsResult<FtpReply> {
        self.ensure_in_step()?;
        self.exchange_open = true;
        let result = self.codec.execute(cmd).await;
        self.exchange_open = false;
        let reply = self.observe(result)?;
        if reply.code == 421 {
            self.broken = true;
            return Err(reply.into_error());
        }
        Ok(reply)
    }

    async fn expect(&mut self, cmd: &str, path: &str) -> FsResult<FtpReply> {
        let reply = self.execute(cmd).await?;
        if reply.is_completion() {
            Ok(reply)
        } else {
            Err(reply.into_error().with_path(path))
        }
    }

    /// Read the reply that closes a data transfer (`226`).
    pub async fn finish_transfer(&mut self) -> FsResult<()> {
        self.ensure_in_step()?;
        self.exchange_open = true;
        let result = self.codec.read_reply().await;
        self.exchange_open = false;
        let reply = self.observe(result)?;
        if reply.code == 421 {
            self.broken = true;
        }
        if reply.is_completion() {
            Ok(())
        } else {
            Err(reply.into_error())
        }
    }

    async fn open_data(&mut self, cmd: &str, path: &str) -> FsResult<DataStream> {
        self.ensure_in_step()?;
        let channel = DataChannel {
            host: &self.host,
            peer: self.peer,
            tls: self.data_tls.as_ref(),
            timeout: self.data_timeout,
        };
        self.exchange_open = true;
        let opened = transfer::open_passive(&mut self.codec, &channel, self.epsv).await;
        self.exchange_open = false;
        let (data, epsv) = self.observe(opened)?;
        self.epsv = epsv;

        let reply = self.execute(cmd).await?;
        if reply.is_preliminary() {
            Ok(data)
        } else {
            Err(reply.into_error().with_path(path))
        }
    }

    // ─── Queries ─────────────────────────────────────────────────

    pub async fn noop(&mut self) -> FsResult<()> {
        self.expect("NOOP", "").await.map(|_| ())
    }

    /// `CWD` as a directory check: `Ok(false)` when the server refuses.
    pub async fn try_cwd(&mut self, path: &str) -> FsResult<bool> {
        let reply = self.execute(&format!("CWD {}", path)).await?;
        match reply.code {
            200..=299 => Ok(true),
            550 | 553 | 501 | 450 => Ok(false),
            _ => Err(reply.into_error().with_path(path)),
        }
    }

    /// `SIZE`; `Ok(None)` when the path is not a regular file.
    pub async fn size(&mut self, path: &str) -> FsResult<Option<u64>> {
        let reply = self.execute(&format!("SIZE {}", path)).await?;
        match reply.code {
            213 => reply
                .message()
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| FsError::protocol(format!("cannot parse SIZE reply '{}'", reply.text()))),
            550 | 450 => Ok(None),
            500 | 502 | 504 => {
                self.features.size = false;
                Err(FsError::unsupported("SIZE is not supported").with_code(reply.code))
            }
            _ => Err(reply.into_error().with_path(path)),
        }
    }

    pub async fn mdtm(&mut self, path: &str) -> FsResult<Option<DateTime<Utc>>> {
        if !self.features.mdtm {
            return Ok(None);
        }
        let reply = self.execute(&format!("MDTM {}", path)).await?;
        if reply.code == 213 {
            Ok(parser::parse_fact_time(reply.message().trim()))
        } else {
            Ok(None)
        }
    }

    /// `MLST`; `Ok(None)` when the server lacks it, `NotFound` when the
    /// path does not exist.
    pub async fn mlst(&mut self, path: &str) -> FsResult<Option<ListingEntry>> {
        if !self.features.mlst {
            return Ok(None);
        }
        let reply = self.execute(&format!("MLST {}", path)).await?;
        match reply.code {
            250 => Ok(reply
                .lines
                .iter()
                .skip(1)
                .find(|l| l.starts_with(' '))
                .and_then(|l| parser::parse_facts(l))),
            550 | 450 => Err(FsError::not_found("no such file or directory").with_path(path)),
            500 | 502 | 504 => {
                self.features.mlst = false;
                Ok(None)
            }
            _ => Err(reply.into_error().with_path(path)),
        }
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// List the current working directory (MLSD, falling back to LIST).
    pub async fn list_cwd(&mut self, dir: &str) -> FsResult<Vec<ListingEntry>> {
        if self.features.mlsd {
            match self.retrieve_text("MLSD", dir).await {
                Ok(body) => return Ok(parser::parse_listing(&body)),
                Err(e) if e.code.is_some_and(|c| matches!(c, 500 | 502 | 504)) => {
                    debug!("MLSD refused, falling back to LIST");
                    self.features.mlsd = false;
                }
                Err(e) => return Err(e),
            }
        }
        let body = self.retrieve_text("LIST", dir).await?;
        Ok(parser::parse_listing(&body))
    }

    async fn retrieve_text(&mut self, cmd: &str, path: &str) -> FsResult<String> {
        if self.listing_open {
            return Err(FsError::disconnected("previous listing was interrupted"));
        }
        self.listing_open = true;
        let body = self.retrieve_body(cmd, path).await;
        self.listing_open = false;
        body
    }

    async fn retrieve_body(&mut self, cmd: &str, path: &str) -> FsResult<String> {
        let mut data = self.open_data(cmd, path).await?;
        let mut buf = Vec::new();
        let read = with_timeout(self.data_timeout, "listing transfer", async {
            data.read_to_end(&mut buf).await.map_err(FsError::from)
        })
        .await;
        drop(data);
        self.observe(read)?;
        self.finish_transfer().await.map_err(|e| e.or_path(path))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ─── Mutations ───────────────────────────────────────────────

    pub async fn mkd(&mut self, path: &str) -> FsResult<()> {
        self.expect(&format!("MKD {}", path), path).await.map(|_| ())
    }

    pub async fn rmd(&mut self, path: &str) -> FsResult<()> {
        self.expect(&format!("RMD {}", path), path).await.map(|_| ())
    }

    pub async fn dele(&mut self, path: &str) -> FsResult<()> {
        self.expect(&format!("DELE {}", path), path).await.map(|_| ())
    }

    // ─── Transfers ───────────────────────────────────────────────

    /// Start a download; `finish_transfer` must follow once the stream is done.
    pub async fn retr(&mut self, path: &str) -> FsResult<DataStream> {
        self.open_data(&format!("RETR {}", path), path).await
    }

    /// Start an upload; `finish_transfer` must follow once the stream is shut down.
    pub async fn stor(&mut self, path: &str) -> FsResult<DataStream> {
        self.open_data(&format!("STOR {}", path), path).await
    }

    pub fn data_timeout(&self) -> Duration {
        self.data_timeout
    }

    pub async fn quit(mut self) {
        if !self.is_broken() {
            let _ = self.codec.execute("QUIT").await;
        }
        debug!("closed FTP session to {}", self.host);
    }
}

async fn expect_completion(codec: &mut FtpCodec, cmd: &str) -> FsResult<FtpReply> {
    let reply = codec.execute(cmd).await?;
    if reply.is_completion() {
        Ok(reply)
    } else {
        Err(reply.into_error())
    }
}

async fn login(codec: &mut FtpCodec, options: &FtpOptions) -> FsResult<()> {
    let user = options.user.as_deref().unwrap_or("anonymous");
    let reply = codec.execute(&format!("USER {}", user)).await?;
    let reply = if reply.is_intermediate() {
        let password = options.password.as_deref().unwrap_or("");
        codec.execute(&format!("PASS {}", password)).await?
    } else {
        reply
    };
    if reply.is_completion() {
        Ok(())
    } else {
        Err(FsError::auth_failed(format!("login as '{}' failed: {}", user, reply.message())).with_code(reply.code))
    }
}
