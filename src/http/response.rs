//! Response synthesis.
//!
//! # Responsibilities
//! - Replay a static instance's stored response with a corrected Content-Length
//! - Build plain-text error responses for rejected connections
//!
//! # Design Decisions
//! - The stored head is parsed with httparse. A head it rejects is replayed
//!   unchanged instead of failing the response
//! - No body separator means the stored text is headers-only and is replayed as-is

use thiserror::Error;

use super::request::header_slots;

const BODY_SEPARATOR: &str = "\r\n\r\n";

/// Why the stored response could not be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("unparsable response head: {0}")]
    Head(#[from] httparse::Error),

    #[error("header block ends before the body separator")]
    Terminator,
}

/// Build a plain-text response for `status` (e.g. `"400 Bad Request"`).
pub fn error_response(status: &str, message: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        message.len(),
        message
    )
    .into_bytes()
}

/// Recompute `Content-Length` for a stored static response.
///
/// Falls back to the original text on any rewrite failure.
pub fn adjust_content_length(raw: &str) -> String {
    match rewrite_content_length(raw) {
        Ok(Some(rewritten)) => rewritten,
        Ok(None) => raw.to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Stored response not rewritable, replaying unchanged");
            raw.to_string()
        }
    }
}

/// `Ok(None)` when there is no body separator.
pub fn rewrite_content_length(raw: &str) -> Result<Option<String>, RewriteError> {
    let Some(idx) = raw.find(BODY_SEPARATOR) else {
        return Ok(None);
    };
    let head = &raw[..idx + BODY_SEPARATOR.len()];
    let body = &raw[head.len()..];

    let mut headers = vec![httparse::EMPTY_HEADER; header_slots(head.as_bytes())];
    let mut response = httparse::Response::new(&mut headers[..]);
    match response.parse(head.as_bytes())? {
        httparse::Status::Complete(len) if len == head.len() => {}
        _ => return Err(RewriteError::Terminator),
    }

    let status_line = head.lines().next().unwrap_or_default();
    let length_line = format!("Content-Length: {}", body.len());
    let mut out = String::with_capacity(raw.len() + length_line.len());
    out.push_str(status_line);
    out.push_str("\r\n");

    let mut written = false;
    for header in response.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            if written {
                continue;
            }
            out.push_str(&length_line);
            written = true;
        } else {
            out.push_str(header.name);
            out.push_str(": ");
            out.push_str(&String::from_utf8_lossy(header.value));
        }
        out.push_str("\r\n");
    }
    if !written {
        out.push_str(&length_line);
        out.push_str("\r\n");
    }

    out.push_str("\r\n");
    out.push_str(body);
    Ok(Some(out))
}
