use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Cursor;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    OPTIONS,
    TRACE,
    CONNECT,
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Method names are case-sensitive; `get` is not `GET`.
    ///
    /// ```
    /// # use forkserve::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "OPTIONS" => Some(Method::OPTIONS),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
            Method::PATCH => "PATCH",
        }
    }

    /// Methods whose entity body is read from the connection.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT)
    }
}

/// Protocol versions accepted by the parser. HTTP/1.0 is the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Addresses of the connection a request arrived on.
///
/// Filled in by the worker before parsing; `Host` may later override the
/// server half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub server_port: String,
    pub remote_addr: String,
    pub remote_port: String,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            server_port: String::new(),
            remote_addr: "0.0.0.0".to_string(),
            remote_port: String::new(),
        }
    }
}

/// Per-request metadata handed to handlers.
///
/// Produced in one pass by [`crate::http::parser::parse_http_request`] and
/// never mutated afterwards. Header names are stored CGI-style as
/// `HTTP_<UPPER_NAME_WITH_UNDERSCORES>`.
#[derive(Debug, Clone)]
pub struct Environment {
    method: Method,
    version: Version,
    request_uri: String,
    path_info: String,
    script_name: String,
    query_string: String,
    headers: BTreeMap<String, String>,
    server_name: String,
    server_port: String,
    remote_addr: String,
    remote_port: String,
    body: Bytes,
}

impl Environment {
    pub fn builder(method: Method, target: &str) -> EnvironmentBuilder {
        EnvironmentBuilder::new(method, target)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    /// Directory component of the request path.
    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    /// Last component of the request path.
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Full request path, query string excluded.
    pub fn path(&self) -> &str {
        self.request_uri
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> &str {
        &self.server_port
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn remote_port(&self) -> &str {
        &self.remote_port
    }

    pub fn url_scheme(&self) -> &'static str {
        "http"
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Looks up a header by wire name (`Content-Type`) or CGI key
    /// (`HTTP_CONTENT_TYPE`).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&*header_key(name)).map(String::as_str)
    }

    /// All headers, keyed `HTTP_*`.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("HTTP_CONTENT_LENGTH")
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request body as a readable stream.
    pub fn input(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    /// CGI-style key lookup, e.g. `REQUEST_METHOD`, `QUERY_STRING`,
    /// `HTTP_USER_AGENT`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "REQUEST_METHOD" => self.method.as_str(),
            "REQUEST_URI" => self.request_uri.as_str(),
            "PATH_INFO" => self.path_info.as_str(),
            "SCRIPT_NAME" => self.script_name.as_str(),
            "QUERY_STRING" => self.query_string.as_str(),
            "SERVER_PROTOCOL" => self.version.as_str(),
            "SERVER_NAME" => self.server_name.as_str(),
            "SERVER_PORT" => self.server_port.as_str(),
            "REMOTE_ADDR" => self.remote_addr.as_str(),
            "REMOTE_PORT" => self.remote_port.as_str(),
            "server.url_scheme" => self.url_scheme(),
            _ => return self.headers.get(key).map(String::as_str),
        };
        Some(value)
    }
}

/// Builds an [`Environment`]. The parser fills it from the wire; handler
/// tests fill it by hand.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    method: Method,
    version: Version,
    target: String,
    headers: BTreeMap<String, String>,
    conn: ConnectionInfo,
    body: Bytes,
}

impl EnvironmentBuilder {
    pub fn new(method: Method, target: &str) -> Self {
        Self {
            method,
            version: Version::Http11,
            target: target.to_string(),
            headers: BTreeMap::new(),
            conn: ConnectionInfo::default(),
            body: Bytes::new(),
        }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Adds a header; repeated names overwrite.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(header_key(name).into_owned(), value.into());
        self
    }

    pub(crate) fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn connection(mut self, conn: ConnectionInfo) -> Self {
        self.conn = conn;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Environment {
        let request_uri = strip_traversal(&self.target).to_string();
        let (path, query) = split_target(&request_uri);
        let (path_info, script_name) = split_script_path(path);

        let mut server_name = self.conn.server_name;
        let mut server_port = self.conn.server_port;
        if let Some(host) = self.headers.get("HTTP_HOST").filter(|h| !h.is_empty()) {
            match host.split_once(':') {
                Some((name, port)) => {
                    server_name = name.to_string();
                    server_port = port.to_string();
                }
                None => {
                    server_name = host.clone();
                    server_port = "80".to_string();
                }
            }
        }

        Environment {
            method: self.method,
            version: self.version,
            path_info,
            script_name,
            query_string: query.to_string(),
            request_uri,
            headers: self.headers,
            server_name,
            server_port,
            remote_addr: self.conn.remote_addr,
            remote_port: self.conn.remote_port,
            body: self.body,
        }
    }
}

/// `Content-Type` -> `HTTP_CONTENT_TYPE`; keys already in that form pass
/// through. For lookups only: names read off the wire go through
/// [`wire_header_key`].
pub fn header_key(name: &str) -> Cow<'_, str> {
    if name.starts_with("HTTP_") && !name.contains('-') {
        return Cow::Borrowed(name);
    }
    Cow::Owned(wire_header_key(name))
}

/// Key for a header name received from a client. Always prefixed, so a
/// client sending `HTTP_HOST:` gets `HTTP_HTTP_HOST`, not `HTTP_HOST`.
pub fn wire_header_key(name: &str) -> String {
    format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"))
}

/// Drops a leading `..` from the literal target.
fn strip_traversal(target: &str) -> &str {
    target.strip_prefix("..").unwrap_or(target)
}

/// Splits a target at the first `?`; a `#fragment` is dropped from either
/// half.
fn split_target(target: &str) -> (&str, &str) {
    let without_fragment = target.split('#').next().unwrap_or_default();
    match without_fragment.split_once('?') {
        Some((path, query)) => (path, query),
        None => (without_fragment, ""),
    }
}

/// `/foo/bar.html` -> (`/foo`, `bar.html`); `/index.html` -> (`/`,
/// `index.html`); `/` -> (`/`, ``).
fn split_script_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        let dir = if path.starts_with('/') { "/" } else { "." };
        return (dir.to_string(), String::new());
    }
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => (".".to_string(), trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_script_path_variants() {
        assert_eq!(split_script_path("/foo/bar.html"), ("/foo".into(), "bar.html".into()));
        assert_eq!(split_script_path("/index.html"), ("/".into(), "index.html".into()));
        assert_eq!(split_script_path("/"), ("/".into(), "".into()));
        assert_eq!(split_script_path("/a/b/"), ("/a".into(), "b".into()));
        assert_eq!(split_script_path("file"), (".".into(), "file".into()));
    }

    #[test]
    fn split_target_drops_fragment() {
        assert_eq!(split_target("/a?x=1&y=2#top"), ("/a", "x=1&y=2"));
        assert_eq!(split_target("/a#top"), ("/a", ""));
        assert_eq!(split_target("/a?b?c"), ("/a", "b?c"));
    }

    #[test]
    fn header_key_normalizes() {
        assert_eq!(header_key("Content-Type"), "HTTP_CONTENT_TYPE");
        assert_eq!(header_key("HTTP_HOST"), "HTTP_HOST");
        assert_eq!(header_key("x-forwarded-for"), "HTTP_X_FORWARDED_FOR");
    }

    #[test]
    fn builder_host_overrides_connection() {
        let env = Environment::builder(Method::GET, "/")
            .connection(ConnectionInfo {
                server_name: "127.0.0.1".into(),
                server_port: "8080".into(),
                ..ConnectionInfo::default()
            })
            .header("Host", "example.com")
            .build();

        assert_eq!(env.server_name(), "example.com");
        assert_eq!(env.server_port(), "80");
    }

    #[test]
    fn get_exposes_cgi_keys() {
        let env = Environment::builder(Method::POST, "/cgi/run.sh?a=1")
            .header("User-Agent", "curl")
            .build();

        assert_eq!(env.get("REQUEST_METHOD"), Some("POST"));
        assert_eq!(env.get("SCRIPT_NAME"), Some("run.sh"));
        assert_eq!(env.get("PATH_INFO"), Some("/cgi"));
        assert_eq!(env.get("QUERY_STRING"), Some("a=1"));
        assert_eq!(env.get("HTTP_USER_AGENT"), Some("curl"));
        assert_eq!(env.get("HTTP_MISSING"), None);
    }
}
