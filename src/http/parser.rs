use crate::http::request::{ConnectionInfo, Environment, Method, Version, wire_header_key};
use crate::http::status::StatusCode;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

/// Largest header block accepted before the blank line shows up.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Default ceiling on a declared `Content-Length`.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// More bytes are needed; not an error unless the peer is done sending
    #[error("incomplete message")]
    Incomplete,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("unsupported method: {0}")]
    InvalidMethod(String),

    #[error("declared body of {declared} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { declared: usize, limit: usize },
}

impl ParseError {
    /// Status the worker answers with when parsing fails.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::Incomplete | ParseError::Malformed(_) => StatusCode::BAD_REQUEST,
            ParseError::UnsupportedVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            ParseError::InvalidMethod(_) => StatusCode::NOT_IMPLEMENTED,
            ParseError::BodyTooLarge { .. } => StatusCode::REQUEST_ENTITY_TOO_LARGE,
        }
    }
}

/// Request line and headers, parsed once. The body is still on the wire
/// (or partly in the caller's buffer) and is attached by [`RequestHead::finish`].
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    target: String,
    version: Version,
    headers: BTreeMap<String, String>,
    body_start: usize,
    body_len: usize,
}

impl RequestHead {
    /// Total bytes the whole request occupies: head, terminator and body.
    pub fn total_len(&self) -> usize {
        self.body_start + self.body_len
    }

    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Builds the environment from a buffer holding at least
    /// [`total_len`](Self::total_len) bytes.
    pub fn finish(self, buf: &[u8], conn: &ConnectionInfo) -> Result<Environment, ParseError> {
        let end = self.total_len();
        if buf.len() < end {
            return Err(ParseError::Incomplete);
        }
        let body = Bytes::copy_from_slice(&buf[self.body_start..end]);

        Ok(Environment::builder(self.method, &self.target)
            .version(self.version)
            .headers(self.headers)
            .connection(conn.clone())
            .body(body)
            .build())
    }
}

/// Parses one request from the front of `buf`.
///
/// Returns the environment and the number of bytes consumed, or
/// [`ParseError::Incomplete`] while the header block or a POST/PUT body is
/// still short. The caller turns `Incomplete` at end of stream into a
/// malformed message.
pub fn parse_http_request(
    buf: &[u8],
    conn: &ConnectionInfo,
) -> Result<(Environment, usize), ParseError> {
    let head = parse_head(buf, MAX_BODY_BYTES)?;
    let consumed = head.total_len();
    Ok((head.finish(buf, conn)?, consumed))
}

/// Parses the request line and headers at the front of `buf`.
///
/// Only the header block has to be buffered. A declared body longer than
/// `max_body` is refused before any of it is read.
pub fn parse_head(buf: &[u8], max_body: usize) -> Result<RequestHead, ParseError> {
    let Some((head_end, sep_len)) = find_headers_end(buf) else {
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError::Malformed("header block too large".into()));
        }
        return Err(ParseError::Incomplete);
    };

    let mut lines = buf[..head_end]
        .split(|b| *b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l));

    let request_line = std::str::from_utf8(lines.next().unwrap_or_default())
        .map_err(|_| ParseError::Malformed("request line is not valid UTF-8".into()))?;
    let (method, target, version) = parse_request_line(request_line)?;
    let headers = parse_headers(lines, version);

    let body_len = if method.has_body() {
        match headers.get("HTTP_CONTENT_LENGTH") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                ParseError::Malformed(format!("invalid Content-Length: {raw}"))
            })?,
            None => 0,
        }
    } else {
        0
    };
    if body_len > max_body {
        return Err(ParseError::BodyTooLarge {
            declared: body_len,
            limit: max_body,
        });
    }

    Ok(RequestHead {
        method,
        target: target.to_string(),
        version,
        headers,
        body_start: head_end + sep_len,
        body_len,
    })
}

/// `METHOD SP TARGET SP HTTP-VERSION`
fn parse_request_line(line: &str) -> Result<(Method, &str, Version), ParseError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Malformed(format!("bad request line: {line:?}")));
    };

    if method.is_empty() || target.is_empty() || !version.starts_with("HTTP/") {
        return Err(ParseError::Malformed(format!("bad request line: {line:?}")));
    }

    let version = Version::from_str(version)
        .ok_or_else(|| ParseError::UnsupportedVersion(version.to_string()))?;
    let method =
        Method::from_str(method).ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;

    Ok((method, target, version))
}

/// Header lines after the request line. Continuation lines (leading SP/HT)
/// extend the previous header under HTTP/1.1 only. Unparseable lines are
/// skipped; repeated names overwrite. Bytes that are not UTF-8 are replaced
/// rather than failing the request.
fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a [u8]>,
    version: Version,
) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    let mut pending: Option<String> = None;

    for raw in lines {
        let text = String::from_utf8_lossy(raw);
        let line: &str = &text;
        if line.is_empty() {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            if version == Version::Http11 {
                if let Some(value) = pending.as_ref().and_then(|name| headers.get_mut(name)) {
                    value.push_str(line.trim());
                }
            }
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            continue;
        }

        let key = wire_header_key(name);
        headers.insert(key.clone(), value.trim().to_string());
        pending = Some(key);
    }

    headers
}

/// Offset of the blank line ending the header block and the terminator
/// length (`\r\n\r\n` or a bare `\n\n`).
pub fn find_headers_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l < c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (env, consumed) = parse_http_request(req, &ConnectionInfo::default()).unwrap();

        assert_eq!(env.path_info(), "/");
        assert_eq!(env.header("Host"), Some("example.com"));
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn bare_lf_terminator() {
        let req = b"GET /x HTTP/1.0\nAccept: */*\n\n";
        let (env, consumed) = parse_http_request(req, &ConnectionInfo::default()).unwrap();

        assert_eq!(env.header("Accept"), Some("*/*"));
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn oversized_head_is_malformed() {
        let mut req = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        req.extend(std::iter::repeat_n(b'a', MAX_HEAD_BYTES));

        let result = parse_http_request(&req, &ConnectionInfo::default());
        assert!(matches!(result, Err(ParseError::Malformed(_))));
    }

    #[test]
    fn head_parses_before_body_arrives() {
        let req = b"PUT /u HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";

        let head = parse_head(req, MAX_BODY_BYTES).unwrap();
        assert_eq!(head.body_len(), 10);
        assert_eq!(head.total_len(), req.len() + 7);
        assert!(matches!(
            head.finish(req, &ConnectionInfo::default()),
            Err(ParseError::Incomplete)
        ));
    }

    #[test]
    fn declared_body_over_limit() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 101\r\n\r\n";

        let err = parse_head(req, 100).unwrap_err();
        assert_eq!(err, ParseError::BodyTooLarge { declared: 101, limit: 100 });
        assert_eq!(err.status(), StatusCode::REQUEST_ENTITY_TOO_LARGE);
    }
}
