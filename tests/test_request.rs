use forkserve::http::request::{ConnectionInfo, Environment, Method, Version};
use std::io::Read;

#[test]
fn test_environment_header_retrieval() {
    let env = Environment::builder(Method::GET, "/")
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build();

    assert_eq!(env.header("Host"), Some("example.com"));
    assert_eq!(env.header("content-type"), Some("application/json"));
    assert_eq!(env.header("HTTP_CONTENT_TYPE"), Some("application/json"));
    assert_eq!(env.header("Missing"), None);
}

#[test]
fn test_environment_content_length_parsing() {
    let env = Environment::builder(Method::POST, "/api")
        .header("Content-Length", "42")
        .build();

    assert_eq!(env.content_length(), Some(42));
}

#[test]
fn test_environment_content_length_missing() {
    let env = Environment::builder(Method::GET, "/").build();

    assert_eq!(env.content_length(), None);
}

#[test]
fn test_environment_input_reads_body() {
    let env = Environment::builder(Method::PUT, "/upload")
        .body(&b"payload"[..])
        .build();

    let mut read = String::new();
    env.input().read_to_string(&mut read).unwrap();
    assert_eq!(read, "payload");
    // The reader is independent of the environment's own copy.
    assert_eq!(env.body().as_ref(), b"payload");
}

#[test]
fn test_environment_defaults() {
    let env = Environment::builder(Method::HEAD, "/").build();

    assert!(env.is_head());
    assert_eq!(env.version(), Version::Http11);
    assert_eq!(env.url_scheme(), "http");
    assert_eq!(env.remote_addr(), "0.0.0.0");
    assert_eq!(env.query_string(), "");
    assert_eq!(env.get("REQUEST_METHOD"), Some("HEAD"));
}

#[test]
fn test_environment_connection_info() {
    let env = Environment::builder(Method::GET, "/")
        .connection(ConnectionInfo {
            server_name: "localhost".into(),
            server_port: "9000".into(),
            remote_addr: "192.168.1.20".into(),
            remote_port: "40000".into(),
        })
        .build();

    assert_eq!(env.server_name(), "localhost");
    assert_eq!(env.server_port(), "9000");
    assert_eq!(env.get("REMOTE_ADDR"), Some("192.168.1.20"));
    assert_eq!(env.get("REMOTE_PORT"), Some("40000"));
}

#[test]
fn test_method_from_str() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("PATCH"), Some(Method::PATCH));
    assert_eq!(Method::from_str("get"), None);
    assert_eq!(Method::from_str("BREW"), None);
}

#[test]
fn test_method_has_body() {
    assert!(Method::POST.has_body());
    assert!(Method::PUT.has_body());
    assert!(!Method::GET.has_body());
    assert!(!Method::DELETE.has_body());
}

#[test]
fn test_version_floor() {
    assert_eq!(Version::from_str("HTTP/1.0"), Some(Version::Http10));
    assert_eq!(Version::from_str("HTTP/1.1"), Some(Version::Http11));
    assert_eq!(Version::from_str("HTTP/0.9"), None);
    assert!(Version::Http10 < Version::Http11);
}
