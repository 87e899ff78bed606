//! Directory listing parsers.
//!
//! Three formats are recognised, tried in order:
//! 1. MLSD/MLST facts (RFC 3659): `type=file;size=1234;modify=20260101120000; name`
//! 2. Unix `ls -l`: `-rw-r--r-- 1 owner group 1234 Jan  1 12:00 name`
//! 3. Windows/IIS: `01-01-26  12:00AM       1234 name`
//!
//! Unrecognised lines are dropped rather than guessed at.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIX_RE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-])[rwxsStT-]{9}[.+@]?\s+  # type + permissions
        \d+\s+                              # link count
        \S+\s+                              # owner
        (?:\S+\s+)?                         # group (absent on some servers)
        (\d+)\s+                            # size
        (\w{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s # date
        (.+)$                               # name, possibly `name -> target`
        "
    )
    .unwrap();
    static ref WINDOWS_RE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+           # date
        (\d{1,2}:\d{2}\s*(?:[AaPp][Mm])?)\s+ # time
        (<DIR>|\d+)\s+                      # size or <DIR>
        (.+)$                               # name
        "
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub link_target: Option<String>,
}

/// Parse a whole LIST or MLSD body; `.` and `..` are filtered out.
pub fn parse_listing(raw: &str) -> Vec<ListingEntry> {
    raw.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty() && !l.starts_with("total "))
        .filter_map(parse_line)
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_line(line: &str) -> Option<ListingEntry> {
    if line.contains('=') && line.contains(';') {
        if let Some(entry) = parse_facts(line) {
            return Some(entry);
        }
    }
    parse_unix(line).or_else(|| parse_windows(line))
}

// ─── Facts (MLSD / MLST) ─────────────────────────────────────────────

/// Parse one fact line. MLST replies carry the full path as the name;
/// callers that need the leaf take it themselves.
pub fn parse_facts(line: &str) -> Option<ListingEntry> {
    let line = line.strip_prefix(' ').unwrap_or(line);
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = None;
    let mut size = None;
    let mut modified = None;
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => Some(EntryKind::File),
                    "dir" => Some(EntryKind::Directory),
                    // The listed directory itself and its parent.
                    "cdir" | "pdir" => return None,
                    v if v.contains("symlink") || v.contains("slink") => Some(EntryKind::Symlink),
                    _ => None,
                }
            }
            "size" | "sizd" => size = value.parse::<u64>().ok(),
            "modify" => modified = parse_fact_time(value),
            _ => {}
        }
    }

    Some(ListingEntry {
        name: name.to_string(),
        kind: kind?,
        size,
        modified,
        link_target: None,
    })
}

/// `YYYYMMDDHHMMSS[.sss]`, always UTC.
pub fn parse_fact_time(value: &str) -> Option<DateTime<Utc>> {
    let base = value.get(..14)?;
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix ────────────────────────────────────────────────────────────

fn parse_unix(line: &str) -> Option<ListingEntry> {
    let caps = UNIX_RE.captures(line)?;
    let kind = match &caps[1] {
        "d" => EntryKind::Directory,
        "l" => EntryKind::Symlink,
        "-" => EntryKind::File,
        _ => return None,
    };
    let size = caps[2].parse::<u64>().ok();
    let modified = parse_unix_date(&caps[3], Utc::now());
    let raw_name = &caps[4];

    let (name, link_target) = match (kind, raw_name.split_once(" -> ")) {
        (EntryKind::Symlink, Some((name, target))) => (name.to_string(), Some(target.to_string())),
        _ => (raw_name.to_string(), None),
    };

    Some(ListingEntry {
        name,
        kind,
        size: if kind == EntryKind::Directory { None } else { size },
        modified,
        link_target,
    })
}

/// `Jan  1 12:00` (within the last year) or `Jan  1  2025`.
fn parse_unix_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let normalised = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalised.contains(':') {
        let with_year = |year: i32| {
            NaiveDateTime::parse_from_str(&format!("{} {}", year, normalised), "%Y %b %d %H:%M")
                .ok()
                .map(|dt| Utc.from_utc_datetime(&dt))
        };
        let this_year = with_year(now.year())?;
        // Recent entries omit the year; a date in the future belongs to last year.
        if this_year > now + chrono::Duration::days(1) {
            return with_year(now.year() - 1);
        }
        return Some(this_year);
    }

    NaiveDate::parse_from_str(&normalised, "%b %d %Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Windows / IIS ───────────────────────────────────────────────────

fn parse_windows(line: &str) -> Option<ListingEntry> {
    let caps = WINDOWS_RE.captures(line)?;
    let (kind, size) = match &caps[3] {
        "<DIR>" => (EntryKind::Directory, None),
        n => (EntryKind::File, n.parse::<u64>().ok()),
    };
    Some(ListingEntry {
        name: caps[4].to_string(),
        kind,
        size,
        modified: parse_windows_date(&caps[1], &caps[2]),
        link_target: None,
    })
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let time = time.replace(' ', "").to_ascii_uppercase();
    let combined = format!("{} {}", date, time);
    ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}
