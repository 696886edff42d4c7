//! Minimal HTTP/1.1 support for the shared listener: request-head parsing
//! for the protocol sniff and one-shot responses.
//!
//! Every response closes the connection; clients re-request per image.

use crate::WireError;

/// Hard cap on accumulated bytes before the header terminator shows up.
pub const MAX_HEAD_BYTES: usize = 8192;

/// Byte offset of the `\r\n\r\n` header terminator, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// A parsed request head (request line + headers, no body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse the bytes up to (not including) the header terminator.
    ///
    /// A request line with fewer than three space-separated parts is
    /// malformed and rejected.
    pub fn parse(head: &[u8]) -> Result<RequestHead, WireError> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split("\r\n");
        let request_line = lines.next().ok_or(WireError::BadRequestHead)?;
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() < 3 {
            return Err(WireError::BadRequestHead);
        }
        let headers = lines
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
            })
            .collect();
        Ok(RequestHead {
            method: parts[0].to_owned(),
            target: parts[1].to_owned(),
            version: parts[2].to_owned(),
            headers,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("Upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Build a complete one-shot HTTP response.
pub fn http_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-cache\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         \r\n",
        status_text(status),
        body.len(),
    );
    let mut response = head.into_bytes();
    response.extend_from_slice(body);
    response
}
