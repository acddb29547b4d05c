use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::response::{Body, Response, canonical_header_name};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Value of the default `X-Powered-By` header.
pub const SERVER_SIGNATURE: &str = concat!("forkserve/", env!("CARGO_PKG_VERSION"));

/// Size of one read when copying a streamed body.
const STREAM_CHUNK: usize = 4096;

/// Final header list for `resp`, in wire order.
///
/// Defaults go first and are overridden by the caller, except
/// `Connection: close` which is always sent. Names are canonicalized here,
/// whichever way the response was built. `Content-Length` is the exact
/// total for bodies of known length; a stream keeps whatever the caller
/// declared.
pub fn finalize_headers(resp: &Response, now: SystemTime) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![
        ("Connection".into(), "close".into()),
        ("X-Powered-By".into(), SERVER_SIGNATURE.into()),
    ];

    for (name, value) in &resp.headers {
        if name.eq_ignore_ascii_case("Connection") {
            continue;
        }
        set(&mut headers, &canonical_header_name(name), value.clone());
    }

    if !resp.body.is_empty() && !has(&headers, "Content-Type") {
        headers.push(("Content-Type".into(), "text/html".into()));
    }

    if let Some(len) = resp.body.len() {
        set(&mut headers, "Content-Length", len.to_string());
    }

    if !has(&headers, "Date") {
        headers.push(("Date".into(), httpdate::fmt_http_date(now)));
    }

    headers
}

/// Status line and header block, terminated by the blank line.
pub fn serialize_head(resp: &Response, now: SystemTime) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in finalize_headers(resp, now) {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf
}

fn has(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn set(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value,
        None => headers.push((name.to_string(), value)),
    }
}

/// Writes one response to a connection.
pub struct ResponseWriter {
    head: Vec<u8>,
    body: Body,
    head_only: bool,
}

impl ResponseWriter {
    /// `head_only` is set for HEAD requests: headers are identical, the body
    /// is released unsent.
    pub fn new(response: Response, head_only: bool) -> Self {
        let head = serialize_head(&response, SystemTime::now());
        Self {
            head,
            body: response.body,
            head_only,
        }
    }

    pub async fn write_to_stream<W>(self, stream: &mut W) -> anyhow::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.head).await?;
        let mut written = 0u64;

        if !self.head_only {
            written = match self.body {
                Body::Empty => 0,
                Body::Text(text) => {
                    stream.write_all(text.as_bytes()).await?;
                    text.len() as u64
                }
                Body::Chunks(chunks) => {
                    let mut total = 0;
                    for chunk in &chunks {
                        stream.write_all(chunk).await?;
                        total += chunk.len() as u64;
                    }
                    total
                }
                Body::Stream(mut reader) => copy_stream(&mut reader, stream).await?,
            };
        }

        stream.flush().await?;
        Ok(written)
    }
}

async fn copy_stream<R, W>(reader: &mut R, writer: &mut W) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; STREAM_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::ResponseBuilder;
    use crate::http::status::StatusCode;
    use std::time::{Duration, UNIX_EPOCH};

    fn fixed_now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(784_111_777)
    }

    #[test]
    fn date_is_rfc1123_gmt() {
        let head = serialize_head(&Response::ok("hi"), fixed_now());
        let text = String::from_utf8(head).unwrap();

        assert!(text.contains("Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n"));
    }

    #[test]
    fn caller_cannot_enable_keep_alive() {
        let resp = ResponseBuilder::new(StatusCode::OK)
            .header("connection", "keep-alive")
            .build();
        let headers = finalize_headers(&resp, fixed_now());

        assert!(headers.contains(&("Connection".into(), "close".into())));
        assert_eq!(headers.iter().filter(|(k, _)| k == "Connection").count(), 1);
    }

    #[test]
    fn stream_without_declared_length_has_no_content_length() {
        let resp = ResponseBuilder::new(StatusCode::OK)
            .body(Body::stream(tokio::io::empty()))
            .build();
        let headers = finalize_headers(&resp, fixed_now());

        assert!(!has(&headers, "Content-Length"));
    }

    #[test]
    fn caller_content_length_overridden_for_text() {
        let resp = ResponseBuilder::new(StatusCode::OK)
            .header("Content-Length", "999")
            .body("test")
            .build();
        let headers = finalize_headers(&resp, fixed_now());

        assert!(headers.contains(&("Content-Length".into(), "4".into())));
    }

    #[test]
    fn struct_literal_headers_are_canonicalized() {
        let resp = Response {
            status: StatusCode::OK,
            headers: vec![
                ("content-type".into(), "text/plain".into()),
                ("x_custom".into(), "1".into()),
            ],
            body: Body::from("hi"),
        };
        let text = String::from_utf8(serialize_head(&resp, fixed_now())).unwrap();

        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("X-Custom: 1\r\n"));
        assert!(!text.contains("content-type"));
    }
}
