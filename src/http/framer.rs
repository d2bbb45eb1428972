//! Request framing over a fragmented byte stream.
//!
//! # State Transitions
//! ```text
//! AwaitingHeaders ──terminator found──▶ HeadersKnown ──body complete──▶ Complete
//!        │                                   │
//!        └──────────── limit / parse ────────┴──────────▶ Error (absorbing)
//! ```
//!
//! # Design Decisions
//! - Every size and format limit is enforced here, before any routing
//! - Errors are sticky; there is no reset, one framer serves one request
//! - The terminator search resumes where the previous one stopped

use thiserror::Error;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length:";

/// Why a byte stream could not be framed into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Headers too large")]
    HeadersTooLarge,

    #[error("Request too large")]
    RequestTooLarge,

    #[error("Invalid Content-Length")]
    InvalidContentLength,

    #[error("Body too large")]
    BodyTooLarge,
}

/// Observable framer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    AwaitingHeaders,
    HeadersKnown,
    Complete,
    Error,
}

/// Size ceilings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Maximum header block size, terminator included.
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Accumulates bytes until one complete HTTP request or a definitive error.
#[derive(Debug)]
pub struct RequestFramer {
    limits: FrameLimits,
    buf: Vec<u8>,
    /// Offset from which the next terminator search starts.
    scan_from: usize,
    /// Offset just past the header terminator.
    header_end: Option<usize>,
    /// Header block plus declared body length.
    expected_len: Option<usize>,
    error: Option<FrameError>,
}

impl RequestFramer {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            buf: Vec::new(),
            scan_from: 0,
            header_end: None,
            expected_len: None,
            error: None,
        }
    }

    /// Feed the next chunk read from the connection.
    pub fn append(&mut self, chunk: &[u8]) {
        if self.error.is_some() {
            return;
        }

        if self.buf.len() + chunk.len() > self.limits.max_header_bytes + self.limits.max_body_bytes {
            self.fail(FrameError::RequestTooLarge);
            return;
        }
        self.buf.extend_from_slice(chunk);

        if self.header_end.is_some() {
            return;
        }

        let Some(end) = self.find_header_end() else {
            if self.buf.len() > self.limits.max_header_bytes {
                self.fail(FrameError::HeadersTooLarge);
            }
            return;
        };

        if end > self.limits.max_header_bytes {
            self.fail(FrameError::HeadersTooLarge);
            return;
        }

        match parse_content_length(&self.buf[..end]) {
            Ok(Some(len)) if len > self.limits.max_body_bytes as u64 => {
                self.fail(FrameError::BodyTooLarge);
            }
            Ok(len) => {
                self.header_end = Some(end);
                self.expected_len = Some(end + len.unwrap_or(0) as usize);
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn state(&self) -> FrameState {
        if self.error.is_some() {
            FrameState::Error
        } else if self.is_complete() {
            FrameState::Complete
        } else if self.header_end.is_some() {
            FrameState::HeadersKnown
        } else {
            FrameState::AwaitingHeaders
        }
    }

    pub fn is_complete(&self) -> bool {
        match self.expected_len {
            Some(expected) => self.error.is_none() && self.buf.len() >= expected,
            None => false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&FrameError> {
        self.error.as_ref()
    }

    /// Length of the header block including its terminator, once known.
    pub fn header_len(&self) -> Option<usize> {
        self.header_end
    }

    /// The framed request: header block plus exactly the declared body.
    ///
    /// Returns `None` until the request is complete. Bytes read past the
    /// declared length are not part of the request.
    pub fn request(&self) -> Option<&[u8]> {
        let expected = self.expected_len?;
        self.is_complete().then(|| &self.buf[..expected])
    }

    fn fail(&mut self, error: FrameError) {
        self.error = Some(error);
        self.buf = Vec::new();
    }

    fn find_header_end(&mut self) -> Option<usize> {
        let start = self.scan_from;
        let found = self.buf[start..]
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR)
            .map(|pos| start + pos + HEADER_TERMINATOR.len());

        if found.is_none() {
            self.scan_from = self.buf.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        }
        found
    }
}

/// Scan header lines for `Content-Length`. `Ok(None)` when absent.
fn parse_content_length(head: &[u8]) -> Result<Option<u64>, FrameError> {
    let head = String::from_utf8_lossy(head);

    for line in head.split("\r\n") {
        let Some(name) = line.get(..CONTENT_LENGTH.len()) else {
            continue;
        };
        if !name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }

        let value = line[CONTENT_LENGTH.len()..].trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FrameError::InvalidContentLength);
        }
        // All digits: the only way to fail is overflow, which is certainly too large.
        return value.parse::<u64>().map(Some).map_err(|_| FrameError::BodyTooLarge);
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] =
        b"POST /hook?x=1 HTTP/1.1\r\nHost: abc.instances.example.com\r\ncontent-LENGTH: 11\r\n\r\nhello world";

    fn limits(header: usize, body: usize) -> FrameLimits {
        FrameLimits {
            max_header_bytes: header,
            max_body_bytes: body,
        }
    }

    fn feed(framer: &mut RequestFramer, bytes: &[u8], chunk: usize) {
        for part in bytes.chunks(chunk) {
            framer.append(part);
        }
    }

    #[test]
    fn framing_is_chunk_invariant() {
        for chunk in 1..=REQUEST.len() {
            let mut framer = RequestFramer::new(FrameLimits::default());
            feed(&mut framer, REQUEST, chunk);
            assert_eq!(framer.state(), FrameState::Complete, "chunk size {}", chunk);
            assert_eq!(framer.request(), Some(REQUEST));
        }
    }

    #[test]
    fn uneven_chunks_reconstruct_identically() {
        let splits = [3usize, 17, 1, 40, 2, 9];
        let mut framer = RequestFramer::new(FrameLimits::default());
        let mut rest = REQUEST;
        for size in splits.iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at((*size).min(rest.len()));
            framer.append(head);
            rest = tail;
        }
        assert_eq!(framer.request(), Some(REQUEST));
    }

    #[test]
    fn states_progress_in_order() {
        let mut framer = RequestFramer::new(FrameLimits::default());
        assert_eq!(framer.state(), FrameState::AwaitingHeaders);

        let split = REQUEST.len() - 5;
        framer.append(&REQUEST[..split]);
        assert_eq!(framer.state(), FrameState::HeadersKnown);
        assert!(!framer.is_complete());
        assert!(framer.request().is_none());

        framer.append(&REQUEST[split..]);
        assert_eq!(framer.state(), FrameState::Complete);
    }

    #[test]
    fn missing_content_length_means_empty_body() {
        let mut framer = RequestFramer::new(FrameLimits::default());
        framer.append(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(framer.is_complete());
        assert_eq!(framer.header_len(), Some(27));
    }

    #[test]
    fn trailing_bytes_are_not_part_of_request() {
        let mut framer = RequestFramer::new(FrameLimits::default());
        framer.append(b"GET / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokEXTRA");
        assert_eq!(framer.request(), Some(&b"GET / HTTP/1.1\r\nContent-Length: 2\r\n\r\nok"[..]));
    }

    #[test]
    fn oversized_headers_fail_in_any_chunking() {
        let mut oversized = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        oversized.extend(std::iter::repeat(b'a').take(200));
        oversized.extend_from_slice(b"\r\n\r\n");

        for chunk in [1, 7, 64, oversized.len()] {
            let mut framer = RequestFramer::new(limits(128, 1024));
            feed(&mut framer, &oversized, chunk);
            assert!(framer.has_error());
            assert_eq!(framer.error(), Some(&FrameError::HeadersTooLarge));
            assert!(!framer.is_complete());
        }
    }

    #[test]
    fn header_limit_counts_only_the_header_block() {
        let mut framer = RequestFramer::new(limits(64, 1024));
        let mut request = b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n".to_vec();
        request.extend(std::iter::repeat(b'b').take(100));
        framer.append(&request);
        assert!(framer.is_complete());
    }

    #[test]
    fn negative_content_length_rejected_before_body() {
        let mut framer = RequestFramer::new(FrameLimits::default());
        framer.append(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n");
        assert_eq!(framer.error(), Some(&FrameError::InvalidContentLength));
        assert_eq!(framer.state(), FrameState::Error);

        framer.append(b"body");
        assert_eq!(framer.error(), Some(&FrameError::InvalidContentLength));
    }

    #[test]
    fn non_numeric_content_length_rejected() {
        let mut framer = RequestFramer::new(FrameLimits::default());
        framer.append(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n");
        assert_eq!(framer.error(), Some(&FrameError::InvalidContentLength));
    }

    #[test]
    fn body_above_limit_rejected() {
        let mut framer = RequestFramer::new(limits(1024, 10));
        framer.append(b"POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n");
        assert_eq!(framer.error(), Some(&FrameError::BodyTooLarge));

        let mut framer = RequestFramer::new(limits(1024, 10));
        framer.append(b"POST / HTTP/1.1\r\nContent-Length: 99999999999999999999999\r\n\r\n");
        assert_eq!(framer.error(), Some(&FrameError::BodyTooLarge));
    }

    #[test]
    fn total_size_is_bounded() {
        let mut framer = RequestFramer::new(limits(32, 8));
        framer.append(b"GET / HTTP/1.1\r\n\r\n");
        assert!(framer.is_complete());

        let mut framer = RequestFramer::new(limits(32, 8));
        framer.append(&[b'x'; 41]);
        assert_eq!(framer.error(), Some(&FrameError::RequestTooLarge));
    }

    #[test]
    fn terminator_split_across_chunks_is_found() {
        let mut framer = RequestFramer::new(FrameLimits::default());
        framer.append(b"GET / HTTP/1.1\r\nHost: a\r");
        framer.append(b"\n\r");
        assert_eq!(framer.state(), FrameState::AwaitingHeaders);
        framer.append(b"\n");
        assert!(framer.is_complete());
    }
}
