//! Parser for the status line and header block a response file may start with.
//!
//! ```text
//! HTTP/1.1 201 Created
//! # lines starting with '#' are ignored
//! Content-Type: text/html
//!
//! <body>
//! ```

use crate::headers::HeaderList;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Status and headers declared at the top of a response file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub status: u16,
    pub headers: HeaderList,
    /// Offset of the first body byte, just past the blank separator line
    pub body_offset: usize,
}

fn status_line() -> &'static Regex {
    static STATUS_LINE: OnceLock<Regex> = OnceLock::new();
    STATUS_LINE.get_or_init(|| {
        Regex::new(r"^HTTP/[1-9](?:\.[0-9])? ([1-5][0-9]{2})(?:\s|$)")
            .expect("valid status line regex")
    })
}

/// Parse a leading header block.
///
/// Returns `None` when the first non-comment line is not a status line, in
/// which case the whole content is body.
pub fn parse(content: &[u8]) -> Option<HeaderBlock> {
    let mut offset = 0;
    let mut status = None;
    let mut headers = HeaderList::new();

    while offset < content.len() {
        let end = content[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(content.len(), |pos| offset + pos + 1);
        let raw = String::from_utf8_lossy(&content[offset..end]);
        let line = raw.trim_end_matches(['\r', '\n']);
        offset = end;

        if line.is_empty() {
            break;
        }
        if line.trim_start().starts_with('#') {
            continue;
        }

        if status.is_none() {
            status = Some(parse_status_line(line)?);
        } else if let Some((name, value)) = line.split_once(':') {
            headers.add(name.trim(), value.trim());
        } else {
            debug!(line = %line, "Ignoring malformed header line in response file");
        }
    }

    status.map(|status| HeaderBlock {
        status,
        headers,
        body_offset: offset,
    })
}

fn parse_status_line(line: &str) -> Option<u16> {
    status_line()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}
