//! Multipart image upload over HTTP.
//!
//! The request body is written by hand so the wire format stays fixed: a UUID
//! boundary per request, an `image` part always labelled `image/jpeg` and a
//! `token` form field repeating the bearer token. File bytes are streamed
//! from disk rather than buffered.

use std::fs::File;
use std::io::{Cursor, Read};
use std::time::Duration;

use log::debug;
use reqwest::blocking::{Body, Client};
use reqwest::header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE};
use uuid::Uuid;

use crate::config::Endpoint;
use crate::error::Result;
use crate::scanner::UploadTarget;

const SUCCESS_MARKER: &str = "\"code\":200";
const LINE_END: &str = "\r\n";

/// Sends one file and hands back the raw response text.
///
/// Implementations must not interpret the response; the engine applies
/// [`is_upload_success`] itself.
pub trait Uploader: Send + Sync {
    fn upload(&self, endpoint: &Endpoint, target: &UploadTarget) -> Result<String>;
}

/// The server reports success inside the JSON payload, not via HTTP status.
pub fn is_upload_success(response: &str) -> bool {
    response.contains(SUCCESS_MARKER)
}

/// Bytes written before and after the file content.
pub fn multipart_envelope(boundary: &str, file_name: &str, token: &str) -> (Vec<u8>, Vec<u8>) {
    let file_name = file_name.replace('"', "%22");

    let head = format!(
        "--{b}{le}Content-Disposition: form-data; name=\"image\"; filename=\"{f}\"{le}Content-Type: image/jpeg{le}{le}",
        b = boundary,
        f = file_name,
        le = LINE_END,
    );
    let tail = format!(
        "{le}--{b}{le}Content-Disposition: form-data; name=\"token\"{le}{le}{t}{le}--{b}--{le}",
        b = boundary,
        t = token,
        le = LINE_END,
    );

    (head.into_bytes(), tail.into_bytes())
}

pub struct HttpUploader {
    client: Client,
}

impl HttpUploader {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("photo_autosync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, endpoint: &Endpoint, target: &UploadTarget) -> Result<String> {
        let file = File::open(&target.path)?;
        let file_len = file.metadata()?.len();

        let boundary = Uuid::new_v4().to_string();
        let (head, tail) = multipart_envelope(&boundary, &target.file_name, &endpoint.token);
        let content_length = head.len() as u64 + file_len + tail.len() as u64;
        let reader = Cursor::new(head).chain(file).chain(Cursor::new(tail));

        debug!(
            "POST {} ({} bytes, boundary {})",
            endpoint.url, content_length, boundary
        );

        let response = self
            .client
            .post(&endpoint.url)
            .header(CONNECTION, "Keep-Alive")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
            .header(AUTHORIZATION, format!("Bearer {}", endpoint.token))
            .body(Body::sized(reader, content_length))
            .send()?;

        let status = response.status();
        let text = response.text()?;
        debug!("{} answered {}: {}", endpoint.url, status, text);

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::io::Write;
    use std::net::TcpListener;
    use std::path::Path;
    use std::thread;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Accept one request, answer with `status_line` and `body`, return the raw request.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];

            let header_end = loop {
                let n = stream.read(&mut chunk).unwrap();
                assert!(n > 0, "connection closed before headers");
                request.extend_from_slice(&chunk[..n]);
                if let Some(pos) = find(&request, b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap();

            while request.len() < header_end + content_length {
                let n = stream.read(&mut chunk).unwrap();
                assert!(n > 0, "connection closed before body");
                request.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });

        (url, handle)
    }

    fn target_in(dir: &Path, name: &str, content: &[u8]) -> UploadTarget {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        UploadTarget {
            file_name: name.to_string(),
            path,
        }
    }

    #[test]
    fn success_predicate_is_a_substring_match() {
        assert!(is_upload_success(r#"{"code":200,"msg":"ok"}"#));
        assert!(is_upload_success(r#"{"data":{"code":200}}"#));
        assert!(!is_upload_success(r#"{"code": 200}"#));
        assert!(!is_upload_success(r#"{"code":500}"#));
        assert!(!is_upload_success(""));
    }

    #[test]
    fn envelope_layout() {
        let (head, tail) = multipart_envelope("XYZ", "cat.png", "tok");
        assert_eq!(
            String::from_utf8(head).unwrap(),
            "--XYZ\r\nContent-Disposition: form-data; name=\"image\"; filename=\"cat.png\"\r\nContent-Type: image/jpeg\r\n\r\n"
        );
        assert_eq!(
            String::from_utf8(tail).unwrap(),
            "\r\n--XYZ\r\nContent-Disposition: form-data; name=\"token\"\r\n\r\ntok\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn sends_expected_request() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", r#"{"code":200,"msg":"saved"}"#);
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path(), "holiday.png", b"\x89PNG fake bytes");
        let endpoint = Endpoint {
            url,
            token: "secret-token".to_string(),
        };

        let uploader = HttpUploader::new(Some(Duration::from_secs(10))).unwrap();
        let response = uploader.upload(&endpoint, &target).unwrap();
        assert_eq!(response, r#"{"code":200,"msg":"saved"}"#);

        let request = server.join().unwrap();
        let header_end = find(&request, b"\r\n\r\n").unwrap() + 4;
        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();

        assert!(headers.starts_with("post /upload http/1.1\r\n"));
        assert!(headers.contains("authorization: bearer secret-token\r\n"));
        assert!(headers.contains("connection: keep-alive\r\n"));

        let boundary = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-type: multipart/form-data; boundary="))
            .unwrap()
            .trim()
            .to_string();
        assert!(Uuid::parse_str(&boundary).is_ok());

        let (head, tail) = multipart_envelope(&boundary, "holiday.png", "secret-token");
        let mut expected = head;
        expected.extend_from_slice(b"\x89PNG fake bytes");
        expected.extend_from_slice(&tail);
        assert_eq!(&request[header_end..], expected.as_slice());
    }

    #[test]
    fn returns_body_even_for_error_status() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error", r#"{"code":500}"#);
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path(), "a.jpg", b"jpg");
        let endpoint = Endpoint {
            url,
            token: "t".to_string(),
        };

        let response = HttpUploader::new(None).unwrap().upload(&endpoint, &target).unwrap();
        server.join().unwrap();
        assert_eq!(response, r#"{"code":500}"#);
        assert!(!is_upload_success(&response));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = UploadTarget {
            file_name: "gone.jpg".to_string(),
            path: dir.path().join("gone.jpg"),
        };
        let endpoint = Endpoint {
            url: "http://127.0.0.1:9/upload".to_string(),
            token: "t".to_string(),
        };

        let err = HttpUploader::new(None).unwrap().upload(&endpoint, &target).unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[test]
    fn unreachable_endpoint_is_an_http_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempfile::tempdir().unwrap();
        let target = target_in(dir.path(), "a.jpg", b"jpg");
        let endpoint = Endpoint {
            url: format!("http://127.0.0.1:{}/upload", port),
            token: "t".to_string(),
        };

        let err = HttpUploader::new(Some(Duration::from_secs(5)))
            .unwrap()
            .upload(&endpoint, &target)
            .unwrap_err();
        assert!(matches!(err, SyncError::Http(_)));
    }
}
