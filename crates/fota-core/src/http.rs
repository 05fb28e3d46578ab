//! Minimal HTTP/1.1 client over the transport layer.
//!
//! Requests are built as literal text and sent with `Connection: close`;
//! responses are parsed incrementally with `httparse` as fragments arrive.
//! Two receive shapes exist: `query` for small JSON exchanges that must
//! fit one buffer, and `download` for streaming an artifact body through
//! a caller-supplied sink.

use std::ops::Range;
use std::time::Duration;

use anyhow::{bail, Context};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::transport::{ConnectionRole, NetDriver, Transport, TransportError};

const MAX_HEADERS: usize = 16;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Malformed HTTP response: {0}")]
    Malformed(String),

    #[error("Response does not fit the receive buffer")]
    TooLarge,

    #[error("Connection closed before a response arrived")]
    NoData,
}

/// Build a GET request.
pub fn build_get(host: &str, path: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: close\r\n\
         \r\n"
    )
}

/// Build a PUT request with a JSON body.
pub fn build_put(host: &str, path: &str, body: &str) -> String {
    build_with_body("PUT", host, path, body)
}

/// Build a POST request with a JSON body.
pub fn build_post(host: &str, path: &str, body: &str) -> String {
    build_with_body("POST", host, path, body)
}

fn build_with_body(method: &str, host: &str, path: &str, body: &str) -> String {
    format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len()
    )
}

struct ResponseHead {
    header_len: usize,
    status: u16,
    content_length: Option<usize>,
}

/// Try to parse a complete response head out of `raw`.
fn parse_head(raw: &[u8]) -> Result<Option<ResponseHead>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let header_len = match response.parse(raw) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(HttpError::Malformed(e.to_string())),
    };

    let status = response
        .code
        .ok_or_else(|| HttpError::Malformed("missing status code".into()))?;

    let mut content_length = None;
    for header in response.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| HttpError::Malformed("non-ascii content-length".into()))?;
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| HttpError::Malformed("bad content-length".into()))?;
            content_length = Some(parsed);
        }
    }

    Ok(Some(ResponseHead {
        header_len,
        status,
        content_length,
    }))
}

/// Send `request` and receive the whole response into `buf`.
///
/// Returns the body range within `buf`. The complete response, header
/// and body, must fit `buf`; only status 200 is accepted. The caller
/// holds the interface lock and an open connection for the role.
pub fn query<N: NetDriver>(
    transport: &Transport<N>,
    role: ConnectionRole,
    request: &str,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<Range<usize>, HttpError> {
    transport.send(role, request.as_bytes())?;

    let mut filled = 0;
    let mut closed = false;
    while !closed {
        if filled == buf.len() {
            return Err(HttpError::TooLarge);
        }
        match transport.recv(role, &mut buf[filled..], timeout)? {
            0 => closed = true,
            n => filled += n,
        }

        if let Some(head) = parse_head(&buf[..filled])? {
            if head.status != 200 {
                warn!(status = head.status, "Server returned non-OK status");
                return Err(HttpError::Status(head.status));
            }

            let body_len = filled - head.header_len;
            match head.content_length {
                Some(len) if body_len >= len => {
                    trace!(header_len = head.header_len, len, "Response complete");
                    return Ok(head.header_len..head.header_len + len);
                }
                // Without a declared length the body runs to the close.
                None if closed => return Ok(head.header_len..filled),
                _ => {}
            }
        }
    }

    if filled == 0 {
        Err(HttpError::NoData)
    } else {
        Err(HttpError::Malformed("connection closed mid-response".into()))
    }
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub content_length: usize,
}

/// Send `request` and stream the response body through `sink`.
///
/// The response must declare a `Content-Length` equal to `expected_len`.
/// Body bytes are handed to `sink` as they arrive; `on_progress` is
/// called with the running byte total after each delivery. A receive
/// timeout mid-body fails the download.
pub fn download<N: NetDriver>(
    transport: &Transport<N>,
    role: ConnectionRole,
    request: &str,
    timeout: Duration,
    expected_len: usize,
    sink: &mut dyn FnMut(&[u8]) -> anyhow::Result<()>,
    on_progress: &mut dyn FnMut(usize),
) -> anyhow::Result<DownloadOutcome> {
    transport
        .send(role, request.as_bytes())
        .context("sending download request")?;

    // Header phase. Headers must fit one buffer; body bytes received
    // along with the final header fragment are passed straight through.
    let mut buf = vec![0u8; crate::transport::RECV_BUF_SIZE];
    let mut filled = 0;
    let head = loop {
        if filled == buf.len() {
            bail!("download response headers exceed receive buffer");
        }
        let n = transport
            .recv(role, &mut buf[filled..], timeout)
            .context("receiving download headers")?;
        if n == 0 {
            bail!("connection closed before download headers arrived");
        }
        filled += n;

        if let Some(head) = parse_head(&buf[..filled])? {
            break head;
        }
    };

    if head.status != 200 {
        bail!(HttpError::Status(head.status));
    }
    let content_length = head
        .content_length
        .context("download response lacks content-length")?;
    if content_length != expected_len {
        bail!(
            "artifact size mismatch: deployment says {expected_len}, server sends {content_length}"
        );
    }
    debug!(content_length, "Download headers complete");

    let mut total = 0;
    let tail = &buf[head.header_len..filled];
    if !tail.is_empty() {
        sink(tail)?;
        total += tail.len();
        on_progress(total);
    }

    while total < content_length {
        let n = match transport.recv(role, &mut buf, timeout) {
            Ok(0) => break,
            Ok(n) => n,
            Err(TransportError::Timeout { timeout_ms }) => {
                bail!("download stalled for {timeout_ms}ms at byte {total}");
            }
            Err(e) => return Err(e).context("receiving download body"),
        };
        sink(&buf[..n])?;
        total += n;
        on_progress(total);
    }

    if total != content_length {
        bail!("download truncated: got {total} of {content_length} bytes");
    }

    Ok(DownloadOutcome { content_length })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockNetDriver;

    const ROLE: ConnectionRole = ConnectionRole::UpdateServer;
    const TIMEOUT: Duration = Duration::from_millis(500);

    fn response(status: &str, body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    #[test]
    fn test_request_text() {
        let get = build_get("server:8080", "/DEFAULT/controller/v1/dev-1");
        assert!(get.starts_with("GET /DEFAULT/controller/v1/dev-1 HTTP/1.1\r\n"));
        assert!(get.contains("Host: server:8080\r\n"));
        assert!(get.ends_with("\r\n\r\n"));

        let post = build_post("server:8080", "/p", r#"{"id":"7"}"#);
        assert!(post.contains("Content-Length: 10\r\n"));
        assert!(post.ends_with(r#"{"id":"7"}"#));
    }

    #[test]
    fn test_query_single_fragment() {
        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_response(&response("200 OK", r#"{"ok":1}"#));
        transport.connect(ROLE, 8080).unwrap();

        let mut buf = [0u8; 256];
        let body = query(&transport, ROLE, "GET / HTTP/1.1\r\n\r\n", &mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf[body], br#"{"ok":1}"#);
    }

    #[test]
    fn test_query_fragmented_response() {
        let raw = response("200 OK", r#"{"config":{}}"#);
        let (a, b) = raw.split_at(20);

        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_fragments(vec![a.to_vec(), b.to_vec()]);
        transport.connect(ROLE, 8080).unwrap();

        let mut buf = [0u8; 256];
        let body = query(&transport, ROLE, "GET / HTTP/1.1\r\n\r\n", &mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf[body], br#"{"config":{}}"#);
    }

    #[test]
    fn test_query_rejects_non_ok_status() {
        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_response(&response("404 Not Found", ""));
        transport.connect(ROLE, 8080).unwrap();

        let mut buf = [0u8; 256];
        let err = query(&transport, ROLE, "GET / HTTP/1.1\r\n\r\n", &mut buf, TIMEOUT).unwrap_err();
        assert!(matches!(err, HttpError::Status(404)));
    }

    #[test]
    fn test_query_response_too_large() {
        let transport = Transport::new(MockNetDriver::new(), "server");
        transport
            .driver()
            .queue_response(&response("200 OK", &"x".repeat(300)));
        transport.connect(ROLE, 8080).unwrap();

        let mut buf = [0u8; 128];
        let err = query(&transport, ROLE, "GET / HTTP/1.1\r\n\r\n", &mut buf, TIMEOUT).unwrap_err();
        assert!(matches!(err, HttpError::TooLarge));
    }

    #[test]
    fn test_query_no_data_on_immediate_close() {
        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_fragments(vec![]);
        transport.connect(ROLE, 8080).unwrap();

        let mut buf = [0u8; 128];
        let err = query(&transport, ROLE, "GET / HTTP/1.1\r\n\r\n", &mut buf, TIMEOUT).unwrap_err();
        assert!(matches!(err, HttpError::NoData));
    }

    #[test]
    fn test_download_streams_body_across_fragments() {
        let body: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let mut raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(&body);

        // Fragments straddle the header/body boundary and the buffer size.
        let fragments: Vec<Vec<u8>> = raw.chunks(700).map(<[u8]>::to_vec).collect();

        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_fragments(fragments);
        transport.connect(ROLE, 8080).unwrap();

        let mut received = Vec::new();
        let mut last_progress = 0;
        let outcome = download(
            &transport,
            ROLE,
            "GET /fw.bin HTTP/1.1\r\n\r\n",
            TIMEOUT,
            body.len(),
            &mut |chunk| {
                received.extend_from_slice(chunk);
                Ok(())
            },
            &mut |total| last_progress = total,
        )
        .unwrap();

        assert_eq!(outcome.content_length, body.len());
        assert_eq!(received, body);
        assert_eq!(last_progress, body.len());
    }

    #[test]
    fn test_download_length_mismatch_rejected() {
        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_response(&response("200 OK", "abcd"));
        transport.connect(ROLE, 8080).unwrap();

        let err = download(
            &transport,
            ROLE,
            "GET /fw.bin HTTP/1.1\r\n\r\n",
            TIMEOUT,
            9999,
            &mut |_| Ok(()),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn test_download_truncated_body_rejected() {
        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0u8; 40]);

        let transport = Transport::new(MockNetDriver::new(), "server");
        transport.driver().queue_response(&raw);
        transport.connect(ROLE, 8080).unwrap();

        let err = download(
            &transport,
            ROLE,
            "GET /fw.bin HTTP/1.1\r\n\r\n",
            TIMEOUT,
            100,
            &mut |_| Ok(()),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
