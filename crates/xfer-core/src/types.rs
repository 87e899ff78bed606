//! Listing records and adapter descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ─── FsItem ──────────────────────────────────────────────────────────

/// One listing record. `is_back_link` marks the synthetic `..` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FsItem {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_symbolic_link: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_back_link: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_object_storage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removable: Option<bool>,
}

impl FsItem {
    pub fn file(name: impl Into<String>, path: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_file: true,
            size,
            ..Default::default()
        }
    }

    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_directory: true,
            ..Default::default()
        }
    }

    /// The `..` entry pointing at `parent`.
    pub fn back_link(parent: impl Into<String>) -> Self {
        Self {
            name: "..".to_string(),
            path: parent.into(),
            is_directory: true,
            is_back_link: Some(true),
            ..Default::default()
        }
    }

    pub fn with_changed(mut self, changed: Option<DateTime<Utc>>) -> Self {
        self.changed = changed;
        self
    }

    pub fn is_back_link(&self) -> bool {
        self.is_back_link.unwrap_or(false)
    }

    pub fn is_symlink(&self) -> bool {
        self.is_symbolic_link.unwrap_or(false)
    }
}

/// Directories first, then case-insensitive by name.
pub fn sort_items(items: &mut [FsItem]) {
    items.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    });
}

// ─── Adapter descriptors ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    Local,
    Webdav,
    Ftp,
}

/// Immutable backend descriptor, tagged on `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdapterOptions {
    Local(LocalOptions),
    Webdav(WebdavOptions),
    Ftp(FtpOptions),
}

impl AdapterOptions {
    pub fn identifier(&self) -> &str {
        match self {
            AdapterOptions::Local(o) => &o.identifier,
            AdapterOptions::Webdav(o) => &o.identifier,
            AdapterOptions::Ftp(o) => &o.identifier,
        }
    }

    pub fn name(&self) -> &str {
        let (name, identifier) = match self {
            AdapterOptions::Local(o) => (&o.name, &o.identifier),
            AdapterOptions::Webdav(o) => (&o.name, &o.identifier),
            AdapterOptions::Ftp(o) => (&o.name, &o.identifier),
        };
        name.as_deref().unwrap_or(identifier)
    }

    pub fn adapter_type(&self) -> AdapterType {
        match self {
            AdapterOptions::Local(_) => AdapterType::Local,
            AdapterOptions::Webdav(_) => AdapterType::Webdav,
            AdapterOptions::Ftp(_) => AdapterType::Ftp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalOptions {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebdavOptions {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Companion API used for permission fix-ups.
    #[serde(default, rename = "apiURL")]
    pub api_url: Option<String>,
    /// Companion API exposing the object-storage catalog.
    #[serde(default, rename = "extraApiURL")]
    pub extra_api_url: Option<String>,
    #[serde(default)]
    pub ignore_certificate_errors: bool,
    #[serde(default)]
    pub update_permissions: bool,
    /// Top-level entries cannot be removed.
    #[serde(default)]
    pub restricted: bool,
    #[serde(default = "default_webdav_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FtpProtocol {
    #[default]
    Ftp,
    /// Implicit TLS.
    Ftps,
    /// Explicit TLS (AUTH TLS).
    Ftpes,
    Sftp,
}

impl FtpProtocol {
    pub fn default_port(self) -> u16 {
        match self {
            FtpProtocol::Ftp | FtpProtocol::Ftpes => 21,
            FtpProtocol::Ftps => 990,
            FtpProtocol::Sftp => 22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FtpOptions {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Host name, optionally with a scheme (`ftp://host`).
    pub url: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: FtpProtocol,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Raise the control-channel transcript from trace to debug.
    #[serde(default)]
    pub enable_logs: bool,
    #[serde(default)]
    pub ignore_certificate_errors: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_data_timeout_secs")]
    pub data_timeout_secs: u64,
}

impl FtpOptions {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Host part of `url`, without scheme, credentials, port or path.
    pub fn host(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let rest = rest.split('/').next().unwrap_or(rest);
        let rest = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
        if let Some(stripped) = rest.strip_prefix('[') {
            return stripped.split(']').next().unwrap_or(stripped);
        }
        match rest.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => rest,
        }
    }
}

fn default_webdav_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_data_timeout_secs() -> u64 {
    30
}
