use crate::http::status::{InvalidStatus, StatusCode};
use bytes::Bytes;
use std::fmt;
use tokio::io::AsyncRead;

/// Response entity.
///
/// `Text` and `Chunks` have a known length and always get an exact
/// `Content-Length`; `Stream` only carries one if the caller declared it.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    /// Written in order, back to back
    Chunks(Vec<Bytes>),
    /// Copied in bounded chunks until EOF, then dropped
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl Body {
    pub fn stream<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Body::Stream(Box::new(reader))
    }

    /// Total byte length, if known without reading.
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Text(s) => Some(s.len() as u64),
            Body::Chunks(chunks) => Some(chunks.iter().map(|c| c.len() as u64).sum()),
            Body::Stream(_) => None,
        }
    }

    /// True when there is definitely nothing to send.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Body::Chunks(chunks) => f.debug_tuple("Chunks").field(&chunks.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<Vec<Bytes>> for Body {
    fn from(chunks: Vec<Bytes>) -> Self {
        Body::Chunks(chunks)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Chunks(vec![Bytes::from(bytes)])
    }
}

/// A status, headers and body, ready for [`crate::http::writer::ResponseWriter`].
///
/// Header names are kept in canonical `Word-Capitalized` form; setting a name
/// that differs only in case or separator replaces the earlier value.
#[derive(Debug, Default)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("content-type", "application/json")
///     .body("{}")
///     .build();
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response {
                status,
                ..Response::default()
            },
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.response.set_header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

impl Response {
    /// Builds a response from a raw `(status, headers, body)` triple; the
    /// status must be in the server's table.
    pub fn new<I, K, V>(status: u16, headers: I, body: impl Into<Body>) -> Result<Self, InvalidStatus>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut response = Response {
            status: StatusCode::from_u16(status)?,
            headers: Vec::new(),
            body: body.into(),
        };
        for (name, value) in headers {
            response.set_header(name.as_ref(), value);
        }
        Ok(response)
    }

    pub fn ok(body: impl Into<Body>) -> Self {
        ResponseBuilder::new(StatusCode::OK).body(body).build()
    }

    /// A plain-text body of the form `404 Not Found`.
    pub fn error(status: StatusCode) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(status.to_string())
            .build()
    }

    pub fn not_found() -> Self {
        Self::error(StatusCode::NOT_FOUND)
    }

    pub fn bad_request() -> Self {
        Self::error(StatusCode::BAD_REQUEST)
    }

    pub fn internal_error() -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = canonical_header_name(name);
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let name = canonical_header_name(name);
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }
}

/// `content_type` / `CONTENT-TYPE` -> `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x_powered_by"), "X-Powered-By");
        assert_eq!(canonical_header_name("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_header_name("ETag"), "Etag");
        assert_eq!(canonical_header_name("date"), "Date");
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut response = Response::ok("x");
        response.set_header("content-type", "text/plain");
        response.set_header("Content-Type", "application/json");

        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn body_lengths() {
        assert_eq!(Body::Empty.len(), Some(0));
        assert_eq!(Body::from("hello").len(), Some(5));
        assert_eq!(
            Body::from(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")]).len(),
            Some(5)
        );
        assert_eq!(Body::stream(tokio::io::empty()).len(), None);
    }
}
