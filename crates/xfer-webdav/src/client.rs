// ──────────────────────────────────────────────────────────────────────────────
// xfer-webdav · client
// ──────────────────────────────────────────────────────────────────────────────
// Low-level HTTP client for a WebDAV endpoint and its companion JSON API:
//  • PROPFIND / MKCOL / DELETE with retry and exponential back-off
//  • streamed GET downloads and channel-fed streamed PUT uploads
//  • href ↔ path translation
// ──────────────────────────────────────────────────────────────────────────────

use crate::xml::{parse_multistatus, DavResource, Depth, PROPFIND_BODY};
use bytes::Bytes;
use futures::TryStreamExt;
use log::{debug, trace, warn};
use percent_encoding::percent_decode_str;
use reqwest::{header, Body, Client, Method, Request, RequestBuilder, Response, StatusCode};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use url::Url;
use xfer_core::{ByteStream, FsError, FsResult, WebdavOptions};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
/// Chunks buffered between the pump and the upload request.
const UPLOAD_QUEUE_DEPTH: usize = 8;

/// Map a transport-level reqwest failure.
pub fn map_reqwest(e: reqwest::Error) -> FsError {
    if e.is_timeout() {
        FsError::timeout(e.to_string())
    } else if e.is_connect() {
        FsError::connection_failed(e.to_string())
    } else if e.is_builder() {
        FsError::invalid_config(e.to_string())
    } else {
        FsError::disconnected(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct WebDavClient {
    http: Client,
    base: Url,
    user: Option<String>,
    password: Option<String>,
}

impl WebDavClient {
    pub fn new(options: &WebdavOptions) -> FsResult<Self> {
        let base = Url::parse(&options.url)
            .map_err(|e| FsError::invalid_config(format!("invalid WebDAV URL '{}': {}", options.url, e)))?;
        if base.cannot_be_a_base() {
            return Err(FsError::invalid_config(format!("'{}' cannot be a base URL", options.url)));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .danger_accept_invalid_certs(options.ignore_certificate_errors)
            .build()
            .map_err(map_reqwest)?;
        Ok(Self {
            http,
            base,
            user: options.user.clone(),
            password: options.password.clone(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    // ── URL builders ─────────────────────────────────────────────────────

    /// Absolute URL of `path`; collections get a trailing slash.
    pub fn url_for(&self, path: &str, collection: bool) -> FsResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FsError::invalid_config("WebDAV URL cannot carry a path"))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            if collection {
                segments.push("");
            }
        }
        Ok(url)
    }

    /// Translate a multistatus href back into an absolute `/`-rooted path.
    pub fn path_from_href(&self, href: &str) -> String {
        let raw_path = if href.starts_with("http://") || href.starts_with("https://") {
            Url::parse(href).map(|u| u.path().to_string()).unwrap_or_else(|_| href.to_string())
        } else {
            href.to_string()
        };
        let decoded = percent_decode_str(&raw_path).decode_utf8_lossy().to_string();
        let base = percent_decode_str(self.base.path()).decode_utf8_lossy().to_string();
        let base = base.trim_end_matches('/');
        let relative = decoded.strip_prefix(base).unwrap_or(&decoded);
        let relative = relative.trim_matches('/');
        format!("/{}", relative)
    }

    // ── Auth header injection ────────────────────────────────────────────

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    // ── WebDAV methods ───────────────────────────────────────────────────

    pub async fn propfind(&self, path: &str, depth: Depth) -> FsResult<Vec<DavResource>> {
        let url = self.url_for(path, false)?;
        let method = Method::from_bytes(b"PROPFIND").map_err(|e| FsError::protocol(e.to_string()))?;
        let req = self
            .http
            .request(method, url.clone())
            .header("Depth", depth.as_str())
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let resp = self.send_with_retry(self.apply_auth(req)).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(map_reqwest)?;
        if status == StatusCode::MULTI_STATUS || status.is_success() {
            parse_multistatus(&text)
        } else {
            Err(FsError::from_http_status(status.as_u16(), &format!("PROPFIND {}", url.path())).with_path(path))
        }
    }

    pub async fn mkcol(&self, path: &str) -> FsResult<()> {
        let url = self.url_for(path, true)?;
        let method = Method::from_bytes(b"MKCOL").map_err(|e| FsError::protocol(e.to_string()))?;
        let req = self.http.request(method, url);
        let resp = self.send_with_retry(self.apply_auth(req)).await?;
        check_success(resp, "MKCOL", path).await
    }

    pub async fn delete(&self, path: &str, collection: bool) -> FsResult<()> {
        let url = self.url_for(path, collection)?;
        let req = self.http.delete(url);
        let resp = self.send_with_retry(self.apply_auth(req)).await?;
        check_success(resp, "DELETE", path).await
    }

    /// Streamed download; the body is never buffered whole.
    pub async fn get_stream(&self, path: &str) -> FsResult<ByteStream> {
        let url = self.url_for(path, false)?;
        let req = self.http.get(url);
        let resp = self.send_with_retry(self.apply_auth(req)).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FsError::from_http_status(status.as_u16(), "GET").with_path(path));
        }
        let body = resp.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }

    /// Start a raw streaming PUT. Bytes pushed into the returned upload
    /// reach the server with channel backpressure.
    pub fn put_stream(&self, path: &str, size: Option<u64>) -> FsResult<Upload> {
        let url = self.url_for(path, false)?;
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_QUEUE_DEPTH);
        let mut req = self
            .http
            .put(url)
            .header(header::CONTENT_TYPE, "application/octet-stream");
        if let Some(size) = size {
            req = req.header(header::CONTENT_LENGTH, size);
        }
        let req = self.apply_auth(req).body(Body::wrap_stream(ReceiverStream::new(rx)));
        trace!("PUT {} (size {:?})", path, size);
        let task = tokio::spawn(async move { req.send().await });
        Ok(Upload {
            path: path.to_string(),
            tx: Some(tx),
            task: Some(task),
        })
    }

    // ── Companion JSON API ───────────────────────────────────────────────

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> FsResult<T> {
        let req = self.http.get(url).header(header::ACCEPT, "application/json");
        let resp = self.send_with_retry(self.apply_auth(req)).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FsError::from_http_status(status.as_u16(), &format!("GET {}", url)));
        }
        resp.json::<T>()
            .await
            .map_err(|e| FsError::protocol(format!("json parse: {}", e)))
    }

    /// Single attempt; callers own their retry policy.
    pub async fn post_json<B: serde::Serialize>(&self, url: &str, body: &B) -> FsResult<()> {
        let req = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body);
        let resp = self.apply_auth(req).send().await.map_err(map_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(FsError::from_http_status(status.as_u16(), &format!("POST {}", url)))
        }
    }

    // ── Retry engine ─────────────────────────────────────────────────────

    async fn send_with_retry(&self, req: RequestBuilder) -> FsResult<Response> {
        let request: Request = req.build().map_err(map_reqwest)?;
        let mut attempt = 0u32;

        loop {
            let cloned = request
                .try_clone()
                .ok_or_else(|| FsError::protocol("request not clonable"))?;
            trace!(">>> {} {}", cloned.method(), cloned.url().path());

            match self.http.execute(cloned).await {
                Ok(resp) => {
                    let status = resp.status();
                    trace!("<<< {} {}", status.as_u16(), request.url().path());
                    if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                        && attempt < MAX_RETRIES
                    {
                        let wait = retry_after_ms(&resp, attempt);
                        warn!("{} from {}, retrying in {}ms", status, request.url().path(), wait);
                        tokio::time::sleep(Duration::from_millis(wait)).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    let mapped = map_reqwest(e);
                    if attempt >= MAX_RETRIES || !mapped.is_connectivity() {
                        return Err(mapped);
                    }
                    let wait = backoff_ms(attempt);
                    debug!("request error, retrying in {}ms: {}", wait, mapped);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ── Upload handle ────────────────────────────────────────────────────────────

/// An in-flight streaming PUT.
pub struct Upload {
    path: String,
    tx: Option<mpsc::Sender<io::Result<Bytes>>>,
    task: Option<JoinHandle<reqwest::Result<Response>>>,
}

impl Upload {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn send(&mut self, chunk: Bytes) -> FsResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FsError::protocol("upload already closed"))?;
        if tx.send(Ok(chunk)).await.is_err() {
            // The request ended early; surface its error.
            self.tx = None;
            return match self.complete().await {
                Ok(()) => Err(FsError::disconnected("server closed the upload early").with_path(&self.path)),
                Err(e) => Err(e),
            };
        }
        Ok(())
    }

    /// Close the body and wait for the server's verdict.
    pub async fn complete(&mut self) -> FsResult<()> {
        self.tx = None;
        let task = self
            .task
            .take()
            .ok_or_else(|| FsError::protocol("upload already completed"))?;
        let resp = task.await?.map_err(|e| map_reqwest(e).with_path(&self.path))?;
        check_success(resp, "PUT", &self.path).await
    }

    /// Fail the body so the server discards the partial upload.
    pub async fn cancel(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(Err(io::Error::new(io::ErrorKind::Interrupted, "upload aborted")));
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Free-standing helpers ────────────────────────────────────────────────────

fn backoff_ms(attempt: u32) -> u64 {
    INITIAL_BACKOFF_MS * 2u64.pow(attempt)
}

fn retry_after_ms(resp: &Response, attempt: u32) -> u64 {
    resp.headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|s| s * 1000)
        .unwrap_or_else(|| backoff_ms(attempt))
}

async fn check_success(resp: Response, method: &str, path: &str) -> FsResult<()> {
    let status = resp.status();
    if status.is_success() || status == StatusCode::MULTI_STATUS {
        Ok(())
    } else {
        let text = resp.text().await.unwrap_or_default();
        let detail = if text.is_empty() {
            method.to_string()
        } else {
            format!("{}: {}", method, &text[..text.len().min(200)])
        };
        Err(FsError::from_http_status(status.as_u16(), &detail).with_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> WebDavClient {
        WebDavClient::new(&WebdavOptions {
            identifier: "dav".into(),
            url: url.into(),
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn url_for_encodes_segments() {
        let c = client("https://dav.test/remote.php/dav/files/alice/");
        let url = c.url_for("/Documents/hello world.pdf", false).unwrap();
        assert_eq!(url.as_str(), "https://dav.test/remote.php/dav/files/alice/Documents/hello%20world.pdf");
        let dir = c.url_for("/Photos", true).unwrap();
        assert_eq!(dir.as_str(), "https://dav.test/remote.php/dav/files/alice/Photos/");
        let root = c.url_for("/", true).unwrap();
        assert_eq!(root.as_str(), "https://dav.test/remote.php/dav/files/alice/");
    }

    #[test]
    fn href_round_trips_to_path() {
        let c = client("https://dav.test/remote.php/dav/files/alice");
        assert_eq!(c.path_from_href("/remote.php/dav/files/alice/a%20b/c.txt"), "/a b/c.txt");
        assert_eq!(c.path_from_href("/remote.php/dav/files/alice/"), "/");
        assert_eq!(
            c.path_from_href("https://dav.test/remote.php/dav/files/alice/Photos/"),
            "/Photos"
        );
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_ms(0), 500);
        assert_eq!(backoff_ms(2), 2000);
    }

    #[test]
    fn rejects_invalid_urls() {
        let err = WebDavClient::new(&WebdavOptions {
            url: "not a url".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.kind, xfer_core::FsErrorKind::InvalidConfig);
    }
}
