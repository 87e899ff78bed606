//! PROPFIND request body and multistatus response parsing.

use xfer_core::{FsError, FsResult};

/// One `<d:response>` entry of a multistatus body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResource {
    /// Percent-encoded href as sent by the server.
    pub href: String,
    pub display_name: Option<String>,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    /// RFC 1123 date, as sent.
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
        }
    }
}

pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// Strip any namespace prefix from a tag name.
fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

pub fn parse_multistatus(xml: &str) -> FsResult<Vec<DavResource>> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut resources = Vec::new();
    let mut current: Option<DavResource> = None;
    let mut text_tag: Option<String> = None;
    let mut in_resourcetype = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => current = Some(DavResource::default()),
                    "resourcetype" => in_resourcetype = true,
                    "collection" if in_resourcetype => {
                        if let Some(res) = current.as_mut() {
                            res.is_collection = true;
                        }
                    }
                    "href" | "displayname" | "getcontentlength" | "getlastmodified" | "getetag" => {
                        text_tag = Some(local)
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if in_resourcetype && local_name(e.name().as_ref()) == "collection" {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(tag), Some(res)) = (text_tag.as_deref(), current.as_mut()) {
                    let text = e
                        .unescape()
                        .map_err(|err| FsError::protocol(format!("bad XML text: {}", err)))?
                        .to_string();
                    match tag {
                        "href" => res.href = text,
                        "displayname" => res.display_name = Some(text),
                        "getcontentlength" => res.content_length = text.trim().parse().ok(),
                        "getlastmodified" => res.last_modified = Some(text),
                        "getetag" => res.etag = Some(text.trim_matches('"').to_string()),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        if let Some(res) = current.take() {
                            resources.push(res);
                        }
                    }
                    "resourcetype" => in_resourcetype = false,
                    _ if text_tag.as_deref() == Some(local.as_str()) => text_tag = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FsError::protocol(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(resources)
}
