//! Passive data channels (RFC 959 PASV, RFC 2428 EPSV).
//!
//! The data socket is TLS-wrapped when the control channel negotiated
//! `PROT P`.

use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use xfer_core::abortable::with_timeout;
use xfer_core::{FsError, FsResult};

lazy_static! {
    static ref PASV_RE: Regex = Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})").unwrap();
    static ref EPSV_RE: Regex = Regex::new(r"\(([!-~])([!-~])([!-~])(\d+)([!-~])\)").unwrap();
}

pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for DataStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Where and how data connections are opened.
pub struct DataChannel<'a> {
    pub host: &'a str,
    pub peer: IpAddr,
    pub tls: Option<&'a TlsConnector>,
    pub timeout: Duration,
}

/// Negotiate a passive data connection, preferring EPSV unless the
/// server already refused it. Returns whether EPSV is still usable.
pub async fn open_passive(
    codec: &mut FtpCodec,
    channel: &DataChannel<'_>,
    try_epsv: bool,
) -> FsResult<(DataStream, bool)> {
    let mut epsv_ok = try_epsv;
    let mut addr = None;

    if try_epsv {
        let reply = codec.execute("EPSV").await?;
        if reply.is_completion() {
            addr = Some(SocketAddr::new(channel.peer, parse_epsv(&reply.text())?));
        } else {
            epsv_ok = false;
        }
    }

    let addr = match addr {
        Some(addr) => addr,
        None => {
            let reply = codec.execute("PASV").await?;
            if !reply.is_completion() {
                return Err(reply.into_error());
            }
            let advertised = parse_pasv(&reply.text())?;
            if advertised.ip().is_unspecified() {
                SocketAddr::new(channel.peer, advertised.port())
            } else {
                advertised
            }
        }
    };

    let tcp = with_timeout(channel.timeout, "data connection", async {
        TcpStream::connect(addr)
            .await
            .map_err(|e| FsError::connection_failed(format!("data connection to {}: {}", addr, e)))
    })
    .await?;

    let stream = match channel.tls {
        Some(connector) => DataStream::Tls(Box::new(tls::connect(connector, channel.host, tcp).await?)),
        None => DataStream::Plain(tcp),
    };
    Ok((stream, epsv_ok))
}

/// `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
pub fn parse_pasv(text: &str) -> FsResult<SocketAddr> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FsError::protocol(format!("cannot parse PASV reply '{}'", text)))?;
    let mut n = [0u8; 6];
    for (i, slot) in n.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse::<u8>()
            .map_err(|_| FsError::protocol(format!("PASV field out of range in '{}'", text)))?;
    }
    let ip = IpAddr::V4(Ipv4Addr::new(n[0], n[1], n[2], n[3]));
    Ok(SocketAddr::new(ip, u16::from(n[4]) * 256 + u16::from(n[5])))
}

/// `229 Entering Extended Passive Mode (|||port|)`
pub fn parse_epsv(text: &str) -> FsResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FsError::protocol(format!("cannot parse EPSV reply '{}'", text)))?;
    caps[4]
        .parse::<u16>()
        .map_err(|_| FsError::protocol(format!("EPSV port out of range in '{}'", text)))
}
