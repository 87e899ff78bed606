//! In-memory WebDAV server plus the companion API endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Default)]
pub struct FakeDav {
    nodes: Mutex<BTreeMap<String, Node>>,
    pub permission_posts: Mutex<Vec<Vec<String>>>,
    /// Successful `MKCOL`/`PUT` requests, in arrival order.
    pub mutations: Mutex<Vec<String>>,
}

impl FakeDav {
    pub fn new() -> Arc<Self> {
        let dav = FakeDav::default();
        dav.nodes.lock().unwrap().insert(String::new(), Node::Dir);
        Arc::new(dav)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(&key(path))
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(&key(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn delivered_paths(&self) -> Vec<String> {
        let mut all: Vec<String> = self.permission_posts.lock().unwrap().iter().flatten().cloned().collect();
        all.sort();
        all
    }
}

fn key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_key(k: &str) -> String {
    match k.rfind('/') {
        Some(pos) => k[..pos].to_string(),
        None => String::new(),
    }
}

fn href(k: &str, dir: bool) -> String {
    let mut out = String::from("/dav");
    for segment in k.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(&utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string());
    }
    if dir {
        out.push('/');
    }
    out
}

fn entry_xml(k: &str, node: &Node) -> String {
    match node {
        Node::Dir => format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop>\
             <d:resourcetype><d:collection/></d:resourcetype></d:prop>\
             <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            href(k, true)
        ),
        Node::File(data) => format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop>\
             <d:getcontentlength>{}</d:getcontentlength>\
             <d:getlastmodified>Wed, 01 Jan 2025 12:00:00 GMT</d:getlastmodified>\
             <d:resourcetype/></d:prop>\
             <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>",
            href(k, false),
            data.len()
        ),
    }
}

async fn handle(
    State(dav): State<Arc<FakeDav>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = percent_decode_str(uri.path()).decode_utf8_lossy().to_string();

    if path == "/api/storages" {
        return (
            [(header::CONTENT_TYPE, "application/json")],
            r#"[{"name":"bucket","objectStorage":true},{"name":"nfs","objectStorage":false}]"#,
        )
            .into_response();
    }
    if path == "/api/permissions" {
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
        let paths = parsed["paths"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        dav.permission_posts.lock().unwrap().push(paths);
        return StatusCode::NO_CONTENT.into_response();
    }
    if path.starts_with("/broken-api/") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let Some(rest) = path.strip_prefix("/dav") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let k = key(rest);
    let mut nodes = dav.nodes.lock().unwrap();

    match method.as_str() {
        "PROPFIND" => {
            let Some(node) = nodes.get(&k).cloned() else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let depth = headers.get("Depth").and_then(|v| v.to_str().ok()).unwrap_or("1");
            let mut xml = String::from(r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:">"#);
            xml.push_str(&entry_xml(&k, &node));
            if depth == "1" && matches!(node, Node::Dir) {
                for (child, child_node) in nodes.iter() {
                    if !child.is_empty() && child != &k && parent_key(child) == k {
                        xml.push_str(&entry_xml(child, child_node));
                    }
                }
            }
            xml.push_str("</d:multistatus>");
            (StatusCode::MULTI_STATUS, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
        }
        "MKCOL" => {
            if nodes.contains_key(&k) {
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
            if !matches!(nodes.get(&parent_key(&k)), Some(Node::Dir)) {
                return StatusCode::CONFLICT.into_response();
            }
            dav.mutations.lock().unwrap().push(format!("MKCOL /{}", k));
            nodes.insert(k, Node::Dir);
            StatusCode::CREATED.into_response()
        }
        "PUT" => {
            if matches!(nodes.get(&k), Some(Node::Dir)) {
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
            if !matches!(nodes.get(&parent_key(&k)), Some(Node::Dir)) {
                return StatusCode::CONFLICT.into_response();
            }
            dav.mutations.lock().unwrap().push(format!("PUT /{}", k));
            nodes.insert(k, Node::File(body.to_vec()));
            StatusCode::CREATED.into_response()
        }
        "GET" => match nodes.get(&k) {
            Some(Node::File(data)) => data.clone().into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        },
        "DELETE" => {
            if !nodes.contains_key(&k) || k.is_empty() {
                return StatusCode::NOT_FOUND.into_response();
            }
            let prefix = format!("{}/", k);
            nodes.retain(|name, _| name != &k && !name.starts_with(&prefix));
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Serve `dav` on an ephemeral port; returns the bound address.
pub async fn serve(dav: Arc<FakeDav>) -> SocketAddr {
    let app = Router::new().fallback(handle).with_state(dav);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
