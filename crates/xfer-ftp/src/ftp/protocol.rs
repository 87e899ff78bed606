//! Control-channel codec (RFC 959 §4).
//!
//! Commands go out CRLF-terminated; replies are read whole, including
//! multi-line `NNN-` continuations, and every read is bounded by the
//! configured reply timeout.

use log::Level;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use xfer_core::abortable::with_timeout;
use xfer_core::{FsError, FsResult};

/// One complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpReply {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text of the final line without the code prefix.
    pub fn message(&self) -> &str {
        self.lines
            .last()
            .map(|l| l.get(4..).unwrap_or("").trim())
            .unwrap_or("")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn into_error(self) -> FsError {
        FsError::from_ftp_reply(self.code, self.message())
    }
}

enum ReadHalf {
    Plain(BufReader<OwnedReadHalf>),
    Tls(BufReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>),
}

enum WriteHalf {
    Plain(OwnedWriteHalf),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
}

pub struct FtpCodec {
    reader: ReadHalf,
    writer: WriteHalf,
    reply_timeout: Duration,
    transcript: Level,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream, reply_timeout: Duration) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: ReadHalf::Plain(BufReader::new(rd)),
            writer: WriteHalf::Plain(wr),
            reply_timeout,
            transcript: Level::Trace,
        }
    }

    pub fn from_tls(stream: TlsStream<TcpStream>, reply_timeout: Duration) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        Self {
            reader: ReadHalf::Tls(BufReader::new(rd)),
            writer: WriteHalf::Tls(wr),
            reply_timeout,
            transcript: Level::Trace,
        }
    }

    /// Log the command/reply transcript at `debug` instead of `trace`.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.transcript = if verbose { Level::Debug } else { Level::Trace };
    }

    pub fn verbose(&self) -> bool {
        self.transcript == Level::Debug
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.writer, WriteHalf::Tls(_))
    }

    /// Hand back the plain socket for an `AUTH TLS` upgrade.
    pub fn into_plain_stream(self) -> FsResult<(TcpStream, Duration, bool)> {
        let verbose = self.verbose();
        let (rd, wr) = match (self.reader, self.writer) {
            (ReadHalf::Plain(rd), WriteHalf::Plain(wr)) => (rd, wr),
            _ => return Err(FsError::protocol("control connection is already TLS")),
        };
        if !rd.buffer().is_empty() {
            return Err(FsError::protocol("unexpected data buffered before TLS upgrade"));
        }
        let tcp = rd
            .into_inner()
            .reunite(wr)
            .map_err(|e| FsError::protocol(format!("reunite failed: {}", e)))?;
        Ok((tcp, self.reply_timeout, verbose))
    }

    pub async fn send_command(&mut self, cmd: &str) -> FsResult<()> {
        let line = format!("{}\r\n", cmd);
        match &mut self.writer {
            WriteHalf::Plain(w) => w.write_all(line.as_bytes()).await?,
            WriteHalf::Tls(w) => w.write_all(line.as_bytes()).await?,
        }
        if cmd.starts_with("PASS ") {
            log::log!(self.transcript, ">>> PASS ****");
        } else {
            log::log!(self.transcript, ">>> {}", cmd);
        }
        Ok(())
    }

    async fn read_line_raw(&mut self) -> FsResult<String> {
        let mut buf = String::new();
        let n = match &mut self.reader {
            ReadHalf::Plain(r) => r.read_line(&mut buf).await?,
            ReadHalf::Tls(r) => r.read_line(&mut buf).await?,
        };
        if n == 0 {
            return Err(FsError::disconnected("server closed the control connection"));
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply_unbounded(&mut self) -> FsResult<FtpReply> {
        let first = self.read_line_raw().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        if lines[0].as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let next = self.read_line_raw().await?;
                let done = next.starts_with(&terminator) || next == code.to_string();
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let reply = FtpReply { code, lines };
        log::log!(self.transcript, "<<< {}", reply.lines.last().map(String::as_str).unwrap_or(""));
        Ok(reply)
    }

    pub async fn read_reply(&mut self) -> FsResult<FtpReply> {
        let limit = self.reply_timeout;
        with_timeout(limit, "FTP reply", self.read_reply_unbounded()).await
    }

    pub async fn execute(&mut self, cmd: &str) -> FsResult<FtpReply> {
        self.send_command(cmd).await?;
        self.read_reply().await
    }
}

fn parse_code(line: &str) -> FsResult<u16> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| FsError::protocol(format!("malformed reply line '{}'", line)))
}
