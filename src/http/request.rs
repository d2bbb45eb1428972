//! Parsed view of a framed request head.
//!
//! # Responsibilities
//! - Validate the request line and header syntax of a framed request
//! - Expose routing-relevant headers (Host, forwarding header)
//! - Strip internal-only headers before the request text is stored

/// Request line and headers of one framed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
}

/// The request head is not valid HTTP/1.x.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed request")]
pub struct MalformedRequest;

impl RequestHead {
    /// Parse the header block of a complete request.
    ///
    /// The header count is bounded only by the framer's byte ceiling.
    pub fn parse(head: &[u8]) -> Result<Self, MalformedRequest> {
        let mut headers = vec![httparse::EMPTY_HEADER; header_slots(head)];
        let mut request = httparse::Request::new(&mut headers[..]);

        match request.parse(head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) | Err(_) => return Err(MalformedRequest),
        }

        let headers = request
            .headers
            .iter()
            .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).trim().to_string()))
            .collect();

        Ok(Self {
            method: request.method.unwrap_or_default().to_string(),
            path: request.path.unwrap_or_default().to_string(),
            headers,
        })
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The Host header, treating an empty value as missing.
    pub fn host(&self) -> Option<&str> {
        self.header("host").filter(|h| !h.is_empty())
    }
}

/// One slot per line in `head` is always enough for httparse.
pub(crate) fn header_slots(head: &[u8]) -> usize {
    head.iter().filter(|&&b| b == b'\n').count().max(1)
}

/// Remove every `name:` line from the header block of `raw`. The body is untouched.
pub fn strip_header(raw: &str, name: &str) -> String {
    let (head, body) = match raw.find("\r\n\r\n") {
        Some(idx) => raw.split_at(idx),
        None => (raw, ""),
    };

    let kept: Vec<&str> = head
        .split("\r\n")
        .filter(|line| !is_header_line(line, name))
        .collect();

    let mut stripped = kept.join("\r\n");
    stripped.push_str(body);
    stripped
}

fn is_header_line(line: &str, name: &str) -> bool {
    line.split_once(':')
        .map(|(n, _)| n.trim().eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_path_and_headers() {
        let head = RequestHead::parse(
            b"GET /a?b=c HTTP/1.1\r\nHOST: abc.instances.example.com\r\nX-Internal-Real-IP: 9.9.9.9\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/a?b=c");
        assert_eq!(head.host(), Some("abc.instances.example.com"));
        assert_eq!(head.header("x-internal-real-ip"), Some("9.9.9.9"));
    }

    #[test]
    fn empty_host_is_missing() {
        let head = RequestHead::parse(b"GET / HTTP/1.1\r\nHost: \r\n\r\n").unwrap();
        assert_eq!(head.host(), None);
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(RequestHead::parse(b"\x00\x01\x02 nope\r\n\r\n"), Err(MalformedRequest));
    }

    #[test]
    fn many_headers_are_accepted() {
        let mut raw = String::from("GET / HTTP/1.1\r\nHost: a.instances.example.com\r\n");
        for n in 0..300 {
            raw.push_str(&format!("x{}: a\r\n", n));
        }
        raw.push_str("\r\n");

        let head = RequestHead::parse(raw.as_bytes()).unwrap();
        assert_eq!(head.host(), Some("a.instances.example.com"));
        assert_eq!(head.header("x299"), Some("a"));
    }

    #[test]
    fn strip_header_only_touches_head() {
        let raw = "GET / HTTP/1.1\r\nHost: a\r\nx-internal-real-ip: 1.1.1.1\r\n\r\nX-Internal-Real-IP: body";
        assert_eq!(
            strip_header(raw, "X-Internal-Real-IP"),
            "GET / HTTP/1.1\r\nHost: a\r\n\r\nX-Internal-Real-IP: body"
        );
    }

    #[test]
    fn strip_header_without_body_separator() {
        assert_eq!(strip_header("GET / HTTP/1.1\r\nHost: a", "x-other"), "GET / HTTP/1.1\r\nHost: a");
    }
}
