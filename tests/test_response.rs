use bytes::Bytes;
use forkserve::http::response::{Body, Response, ResponseBuilder};
use forkserve::http::status::{InvalidStatus, StatusCode};
use forkserve::http::writer::{ResponseWriter, SERVER_SIGNATURE, finalize_headers, serialize_head};
use std::time::SystemTime;

async fn render(response: Response, head_only: bool) -> String {
    let mut out: Vec<u8> = Vec::new();
    ResponseWriter::new(response, head_only)
        .write_to_stream(&mut out)
        .await
        .unwrap();
    String::from_utf8(out).unwrap()
}

fn split(raw: &str) -> (&str, &str) {
    raw.split_once("\r\n\r\n").unwrap()
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    assert_eq!(StatusCode::NO_CONTENT.reason_phrase(), "No Content");
    assert_eq!(StatusCode::BAD_REQUEST.reason_phrase(), "Bad Request");
    assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED.reason_phrase(), "Method Not Allowed");
    assert_eq!(
        StatusCode::INTERNAL_SERVER_ERROR.reason_phrase(),
        "Internal Server Error"
    );
    assert_eq!(
        StatusCode::HTTP_VERSION_NOT_SUPPORTED.reason_phrase(),
        "HTTP Version not supported"
    );
}

#[test]
fn test_response_new_rejects_unknown_status() {
    let result = Response::new(299, Vec::<(&str, &str)>::new(), "");
    assert_eq!(result.unwrap_err(), InvalidStatus(299));

    assert!(StatusCode::try_from(451u16).is_err());
    assert!(StatusCode::try_from(418u16).is_ok());
}

#[test]
fn test_response_defaults() {
    let response = Response::default();

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.headers.is_empty());
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_text_body_round_trip() {
    let response = Response::new(200, [("Content-Type", "text/plain")], "hello").unwrap();
    let raw = render(response, false).await;
    let (head, body) = split(&raw);

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
    assert!(head.contains("Content-Type: text/plain\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn test_head_has_same_headers_and_no_body() {
    let build = || {
        ResponseBuilder::new(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .body(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"defg")])
            .build()
    };

    let get = render(build(), false).await;
    let head = render(build(), true).await;

    let (get_head, get_body) = split(&get);
    let (head_head, head_body) = split(&head);

    // Date may tick over between the two renders.
    let strip_date = |h: &str| {
        h.lines()
            .filter(|l| !l.starts_with("Date:"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(strip_date(get_head), strip_date(head_head));
    assert!(get_head.contains("Content-Length: 7"));
    assert_eq!(get_body, "abcdefg");
    assert_eq!(head_body, "");
}

#[tokio::test]
async fn test_stream_body_is_copied_in_full() {
    let payload = "x".repeat(10_000);
    let response = ResponseBuilder::new(StatusCode::OK)
        .body(Body::stream(std::io::Cursor::new(payload.clone().into_bytes())))
        .build();

    let raw = render(response, false).await;
    let (head, body) = split(&raw);

    assert!(!head.contains("Content-Length"));
    assert_eq!(body.len(), 10_000);
    assert_eq!(body, payload);
}

#[test]
fn test_default_headers_and_caller_override() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("x-powered-by", "custom")
        .body("<p>hi</p>")
        .build();
    let headers = finalize_headers(&response, SystemTime::now());

    let get = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    assert_eq!(get("X-Powered-By"), Some("custom"));
    assert_eq!(get("Content-Type"), Some("text/html"));
    assert_eq!(get("Connection"), Some("close"));
    assert!(get("Date").is_some());
}

#[test]
fn test_default_powered_by_signature() {
    let headers = finalize_headers(&Response::default(), SystemTime::now());

    assert!(headers.contains(&("X-Powered-By".to_string(), SERVER_SIGNATURE.to_string())));
    assert!(SERVER_SIGNATURE.starts_with("forkserve/"));
    // Empty body: no default content type, exact zero length.
    assert!(!headers.iter().any(|(k, _)| k == "Content-Type"));
    assert!(headers.contains(&("Content-Length".to_string(), "0".to_string())));
}

#[test]
fn test_header_names_are_canonical_on_the_wire() {
    let response = ResponseBuilder::new(StatusCode::NO_CONTENT)
        .header("x-request-id", "7")
        .header("cache_control", "no-store")
        .build();
    let head = String::from_utf8(serialize_head(&response, SystemTime::now())).unwrap();

    assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(head.contains("X-Request-Id: 7\r\n"));
    assert!(head.contains("Cache-Control: no-store\r\n"));
    assert!(head.ends_with("\r\n\r\n"));
}

#[test]
fn test_error_response_body() {
    let response = Response::not_found();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.body.len(), Some("404 Not Found".len() as u64));
}
