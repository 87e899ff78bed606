//! Scripted in-memory FTP server: enough of RFC 959/3659 for the adapter,
//! with switches for missing features, slow listings and dropped sessions.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

pub struct FakeFtp {
    nodes: Mutex<BTreeMap<String, Node>>,
    /// Advertise and serve MLST/MLSD.
    pub mlst: bool,
    /// Answer SIZE with 502.
    pub size_unsupported: bool,
    /// Reply 421 and hang up on the next command.
    pub drop_next: AtomicBool,
    /// Hold the next MLSD/LIST reply back for a moment.
    pub stall_listing: AtomicBool,
    connections: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl FakeFtp {
    pub fn new(mlst: bool) -> Arc<Self> {
        Self::with_options(mlst, false)
    }

    pub fn with_options(mlst: bool, size_unsupported: bool) -> Arc<Self> {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Arc::new(Self {
            nodes: Mutex::new(nodes),
            mlst,
            size_unsupported,
            drop_next: AtomicBool::new(false),
            stall_listing: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn put_dir(&self, path: &str) {
        self.nodes.lock().unwrap().insert(path.to_string(), Node::Dir);
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.nodes.lock().unwrap().insert(path.to_string(), Node::File(data.to_vec()));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(d)) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(path)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn node(&self, path: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(path).cloned()
    }

    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.as_str() != "/" && k.starts_with(&prefix) && !k[prefix.len()..].contains('/'))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect()
    }
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn resolve(cwd: &str, arg: &str) -> String {
    let joined = if arg.starts_with('/') {
        arg.to_string()
    } else if cwd == "/" {
        format!("/{}", arg)
    } else {
        format!("{}/{}", cwd, arg)
    };
    let trimmed = joined.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn facts(name: &str, node: &Node) -> String {
    match node {
        Node::Dir => format!("type=dir;modify=20250101120000; {}", name),
        Node::File(d) => format!("type=file;size={};modify=20250101120000; {}", d.len(), name),
    }
}

fn unix_line(name: &str, node: &Node) -> String {
    match node {
        Node::Dir => format!("drwxr-xr-x    2 ftp      ftp          4096 Jan 01  2025 {}", name),
        Node::File(d) => format!("-rw-r--r--    1 ftp      ftp      {:>8} Jan 01  2025 {}", d.len(), name),
    }
}

struct Session {
    ftp: Arc<FakeFtp>,
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    cwd: String,
    passive: Option<TcpListener>,
}

impl Session {
    async fn reply(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await
    }

    async fn data(&mut self) -> Option<TcpStream> {
        let listener = self.passive.take()?;
        listener.accept().await.ok().map(|(s, _)| s)
    }

    async fn send_data(&mut self, body: Vec<u8>) -> std::io::Result<()> {
        self.reply("150 Opening data connection").await?;
        if let Some(mut data) = self.data().await {
            data.write_all(&body).await?;
            data.shutdown().await?;
        }
        self.reply("226 Transfer complete").await
    }

    async fn run(mut self) -> std::io::Result<()> {
        self.reply("220 fake ftp ready").await?;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end().to_string();
            self.ftp.commands.lock().unwrap().push(line.clone());
            let (cmd, arg) = match line.split_once(' ') {
                Some((c, a)) => (c.to_ascii_uppercase(), a.to_string()),
                None => (line.to_ascii_uppercase(), String::new()),
            };

            if self.ftp.drop_next.swap(false, Ordering::SeqCst) {
                self.reply("421 Service not available, closing control connection").await?;
                return Ok(());
            }

            if matches!(cmd.as_str(), "MLSD" | "LIST") && self.ftp.stall_listing.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }

            let path = resolve(&self.cwd, &arg);
            match cmd.as_str() {
                "USER" => self.reply("331 Password required").await?,
                "PASS" if arg == "secret" => self.reply("230 Logged in").await?,
                "PASS" => self.reply("530 Login incorrect").await?,
                "FEAT" => {
                    let mut lines = vec!["211-Features:".to_string(), " SIZE".into(), " MDTM".into(), " UTF8".into()];
                    if self.ftp.mlst {
                        lines.push(" MLST type*;size*;modify*;".into());
                    }
                    lines.push("211 End".into());
                    for l in lines {
                        self.reply(&l).await?;
                    }
                }
                "OPTS" | "TYPE" | "NOOP" => self.reply("200 OK").await?,
                "QUIT" => {
                    self.reply("221 Bye").await?;
                    return Ok(());
                }
                "EPSV" | "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0").await?;
                    let port = listener.local_addr()?.port();
                    self.passive = Some(listener);
                    if cmd == "EPSV" {
                        self.reply(&format!("229 Entering Extended Passive Mode (|||{}|)", port)).await?;
                    } else {
                        self.reply(&format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256))
                            .await?;
                    }
                }
                "CWD" => match self.ftp.node(&path) {
                    Some(Node::Dir) => {
                        self.cwd = path;
                        self.reply("250 Directory changed").await?
                    }
                    _ => self.reply("550 Failed to change directory").await?,
                },
                "SIZE" if self.ftp.size_unsupported => self.reply("502 Command not implemented").await?,
                "SIZE" => match self.ftp.node(&path) {
                    Some(Node::File(d)) => self.reply(&format!("213 {}", d.len())).await?,
                    _ => self.reply("550 Could not get file size").await?,
                },
                "MDTM" => match self.ftp.node(&path) {
                    Some(Node::File(_)) => self.reply("213 20250101120000").await?,
                    _ => self.reply("550 Could not get modification time").await?,
                },
                "MLST" if self.ftp.mlst => match self.ftp.node(&path) {
                    Some(node) => {
                        self.reply("250-Listing").await?;
                        self.reply(&format!(" {}", facts(&path, &node))).await?;
                        self.reply("250 End").await?
                    }
                    None => self.reply("550 No such file or directory").await?,
                },
                "MLSD" if self.ftp.mlst => {
                    let mut body = String::from("type=cdir;modify=20250101120000; .\r\n");
                    for (name, node) in self.ftp.children(&self.cwd) {
                        body.push_str(&facts(&name, &node));
                        body.push_str("\r\n");
                    }
                    self.send_data(body.into_bytes()).await?
                }
                "LIST" => {
                    let mut body = String::from("total 0\r\n");
                    for (name, node) in self.ftp.children(&self.cwd) {
                        body.push_str(&unix_line(&name, &node));
                        body.push_str("\r\n");
                    }
                    self.send_data(body.into_bytes()).await?
                }
                "RETR" => match self.ftp.node(&path) {
                    Some(Node::File(d)) => self.send_data(d).await?,
                    _ => {
                        self.passive = None;
                        self.reply("550 Failed to open file").await?
                    }
                },
                "STOR" => {
                    if !matches!(self.ftp.node(&parent(&path)), Some(Node::Dir))
                        || matches!(self.ftp.node(&path), Some(Node::Dir))
                    {
                        self.passive = None;
                        self.reply("553 Could not create file").await?;
                        continue;
                    }
                    self.reply("150 Ok to send data").await?;
                    let mut body = Vec::new();
                    if let Some(mut data) = self.data().await {
                        data.read_to_end(&mut body).await?;
                    }
                    self.ftp.put_file(&path, &body);
                    self.reply("226 Transfer complete").await?
                }
                "MKD" => {
                    if self.ftp.contains(&path) {
                        self.reply("550 File exists").await?
                    } else if !matches!(self.ftp.node(&parent(&path)), Some(Node::Dir)) {
                        self.reply("550 No such file or directory").await?
                    } else {
                        self.ftp.put_dir(&path);
                        self.reply(&format!("257 \"{}\" created", path)).await?
                    }
                }
                "RMD" => {
                    if matches!(self.ftp.node(&path), Some(Node::Dir)) && self.ftp.children(&path).is_empty() {
                        self.ftp.nodes.lock().unwrap().remove(&path);
                        self.reply("250 Directory removed").await?
                    } else {
                        self.reply("550 Remove directory operation failed").await?
                    }
                }
                "DELE" => {
                    if matches!(self.ftp.node(&path), Some(Node::File(_))) {
                        self.ftp.nodes.lock().unwrap().remove(&path);
                        self.reply("250 Delete operation successful").await?
                    } else {
                        self.reply("550 Delete operation failed").await?
                    }
                }
                _ => self.reply("502 Command not implemented").await?,
            }
        }
    }
}

/// Serve `ftp` on an ephemeral port; every accepted connection is a session.
pub async fn serve(ftp: Arc<FakeFtp>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            ftp.connections.fetch_add(1, Ordering::SeqCst);
            let (rd, wr) = stream.into_split();
            let session = Session {
                ftp: ftp.clone(),
                reader: BufReader::new(rd),
                writer: wr,
                cwd: "/".to_string(),
                passive: None,
            };
            tokio::spawn(session.run());
        }
    });
    addr
}
