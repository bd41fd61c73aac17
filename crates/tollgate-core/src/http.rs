//! Raw HTTP/1.x request and response codec.
//!
//! The codec only splits what has already been received: the header block
//! ends at the first `\r\n\r\n`, and whatever follows it in the same buffer is
//! kept as body bytes. Framing beyond that point (Content-Length, reading
//! until close) is the job of whoever consumes the parsed value.
//!
//! ```
//! use tollgate_core::http::ParsedRequest;
//!
//! let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
//! let request = ParsedRequest::parse(raw).unwrap();
//!
//! assert_eq!(request.method, "GET");
//! assert_eq!(request.host(), Some("example.com"));
//! assert_eq!(request.raw, raw);
//! ```

use thiserror::Error;

/// Marks the end of a header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors raised while decoding a request or response head.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No `\r\n\r\n` was found in the input.
    #[error("header block is not terminated")]
    MissingTerminator,

    /// The header block is not valid UTF-8.
    #[error("header block is not valid UTF-8")]
    InvalidUtf8,

    /// The request line or status line does not have the expected shape.
    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),

    /// A header line has no `": "` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// The status code is not a three digit number.
    #[error("invalid status code: {0:?}")]
    InvalidStatus(String),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Returns the offset just past the first header terminator, if any.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Ordered header mapping.
///
/// Names are unique under ASCII case-insensitive comparison. Setting a name
/// that already exists replaces its value in place, so the first occurrence
/// keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a header value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Looks up a header value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns true if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length")
            .and_then(|value| value.trim().parse().ok())
    }

    /// Returns true if the message declares a chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .map(|value| value.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut headers = Self::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
            headers.set(name, value);
        }
        Ok(headers)
    }
}

/// Splits `raw` into a UTF-8 header block (without the terminator) and the
/// bytes that follow it.
fn split_head(raw: &[u8]) -> Result<(&str, &[u8])> {
    let end = find_header_end(raw).ok_or(ParseError::MissingTerminator)?;
    let head = &raw[..end - HEADER_TERMINATOR.len()];
    let head = std::str::from_utf8(head).map_err(|_| ParseError::InvalidUtf8)?;
    Ok((head, &raw[end..]))
}

/// A request decoded from the bytes a client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target: a path, an absolute URI, or `host:port` for CONNECT.
    pub target: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub version: String,
    /// Request headers.
    pub headers: Headers,
    /// Body bytes received with the head, `None` when nothing followed it.
    pub body: Option<Vec<u8>>,
    /// The exact bytes received.
    pub raw: Vec<u8>,
}

impl ParsedRequest {
    /// Decodes a request from raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (head, body) = split_head(raw)?;
        let mut lines = head.split("\r\n");
        let start = lines.next().unwrap_or_default();

        let tokens: Vec<&str> = start.split_whitespace().collect();
        let [method, target, version] = tokens.as_slice() else {
            return Err(ParseError::MalformedStartLine(start.to_string()));
        };

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers: Headers::parse_lines(lines)?,
            body: (!body.is_empty()).then(|| body.to_vec()),
            raw: raw.to_vec(),
        })
    }

    /// The `Host` header value.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("Host")
    }

    /// Returns true if body bytes were received.
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|body| !body.is_empty())
    }

    /// Returns true for CONNECT requests.
    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }

    /// Value of the first `name=` field in a form-encoded body.
    ///
    /// Fields are split on `&` only; values are returned verbatim without
    /// percent decoding.
    pub fn form_field(&self, name: &str) -> Option<String> {
        let body = String::from_utf8_lossy(self.body.as_deref()?);
        body.split('&').find_map(|field| {
            field
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
    }
}

/// A response head decoded from the first bytes an origin sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Protocol version.
    pub version: String,
    /// Numeric status code.
    pub status: u16,
    /// Reason phrase, possibly empty.
    pub reason: String,
    /// Response headers.
    pub headers: Headers,
    /// Header block including the terminating blank line.
    pub raw_head: Vec<u8>,
    /// Body bytes that arrived together with the head.
    pub body: Vec<u8>,
}

impl ParsedResponse {
    /// Decodes a response head from raw bytes.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (head, body) = split_head(raw)?;
        let mut lines = head.split("\r\n");
        let start = lines.next().unwrap_or_default();

        let mut parts = start.splitn(3, ' ');
        let (Some(version), Some(status)) = (parts.next(), parts.next()) else {
            return Err(ParseError::MalformedStartLine(start.to_string()));
        };
        if version.is_empty() {
            return Err(ParseError::MalformedStartLine(start.to_string()));
        }
        if status.len() != 3 {
            return Err(ParseError::InvalidStatus(status.to_string()));
        }
        let status = status
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidStatus(status.to_string()))?;

        Ok(Self {
            version: version.to_string(),
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            headers: Headers::parse_lines(lines)?,
            raw_head: raw[..raw.len() - body.len()].to_vec(),
            body: body.to_vec(),
        })
    }

    /// Status below 400.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Statuses that never carry a body regardless of headers.
    pub fn is_bodiless_status(&self) -> bool {
        (100..200).contains(&self.status) || self.status == 204 || self.status == 304
    }

    /// Returns true if the response carries a body for the given request
    /// method.
    ///
    /// For HEAD only bytes that actually arrived count, since Content-Length
    /// describes the representation rather than a body on the wire.
    pub fn carries_body(&self, method: &str) -> bool {
        if !self.body.is_empty() {
            return true;
        }
        if method == "HEAD" || self.is_bodiless_status() {
            return false;
        }
        self.headers.content_length().is_some_and(|len| len > 0) || self.headers.is_chunked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_without_body() {
        let raw = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
        let request = ParsedRequest::parse(raw).unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/index.html");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.host(), Some("example.com"));
        assert_eq!(request.headers.len(), 2);
        assert!(request.body.is_none());
        assert!(!request.has_body());
        assert_eq!(request.raw, raw.to_vec());
    }

    #[test]
    fn parse_request_with_body() {
        let raw = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 16\r\n\r\ntoken=8a21bce200";
        let request = ParsedRequest::parse(raw).unwrap();

        assert!(request.has_body());
        assert_eq!(request.body.as_deref(), Some(&b"token=8a21bce200"[..]));
        assert_eq!(request.headers.content_length(), Some(16));
    }

    #[test]
    fn parse_connect_request() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let request = ParsedRequest::parse(raw).unwrap();
        assert!(request.is_connect());
        assert_eq!(request.target, "example.com:443");
    }

    #[test]
    fn duplicate_headers_last_write_wins() {
        let raw = b"GET / HTTP/1.1\r\nHost: first\r\nX-A: 1\r\nhost: second\r\n\r\n";
        let request = ParsedRequest::parse(raw).unwrap();

        assert_eq!(request.host(), Some("second"));
        let names: Vec<&str> = request.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Host", "X-A"]);
    }

    #[test]
    fn header_values_keep_inner_separators() {
        let raw = b"GET / HTTP/1.1\r\nX-Note: a: b\r\n\r\n";
        let request = ParsedRequest::parse(raw).unwrap();
        assert_eq!(request.headers.get("x-note"), Some("a: b"));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let err = ParsedRequest::parse(b"GET / HTTP/1.1\r\nHost: a\r\n").unwrap_err();
        assert_eq!(err, ParseError::MissingTerminator);
    }

    #[test]
    fn wrong_token_count_is_rejected() {
        assert!(matches!(
            ParsedRequest::parse(b"GET /\r\n\r\n"),
            Err(ParseError::MalformedStartLine(_))
        ));
        assert!(matches!(
            ParsedRequest::parse(b"GET / HTTP/1.1 extra\r\n\r\n"),
            Err(ParseError::MalformedStartLine(_))
        ));
    }

    #[test]
    fn header_without_separator_is_rejected() {
        assert!(matches!(
            ParsedRequest::parse(b"GET / HTTP/1.1\r\nHost example.com\r\n\r\n"),
            Err(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn non_utf8_head_is_rejected() {
        assert_eq!(
            ParsedRequest::parse(b"GET /\xff HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::InvalidUtf8
        );
    }

    #[test]
    fn form_field_takes_first_exact_field() {
        let raw = b"POST / HTTP/1.1\r\n\r\nmytoken=nope&token=abc&token=def";
        let request = ParsedRequest::parse(raw).unwrap();
        assert_eq!(request.form_field("token"), Some("abc".to_string()));
        assert_eq!(request.form_field("missing"), None);
    }

    #[test]
    fn form_field_without_body() {
        let request = ParsedRequest::parse(b"POST / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.form_field("token"), None);
    }

    #[test]
    fn parse_response_splits_head_and_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel";
        let response = ParsedResponse::parse(raw).unwrap();

        assert_eq!(response.version, "HTTP/1.1");
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.raw_head, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(response.body, b"hel");
        assert!(response.is_success());
    }

    #[test]
    fn parse_response_multi_word_reason() {
        let response = ParsedResponse::parse(b"HTTP/1.1 404 Not Found\r\n\r\n").unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.reason, "Not Found");
        assert!(!response.is_success());
    }

    #[test]
    fn parse_response_rejects_bad_status() {
        assert!(matches!(
            ParsedResponse::parse(b"HTTP/1.1 abc OK\r\n\r\n"),
            Err(ParseError::InvalidStatus(_))
        ));
        assert!(matches!(
            ParsedResponse::parse(b"HTTP/1.1\r\n\r\n"),
            Err(ParseError::MalformedStartLine(_))
        ));
    }

    #[test]
    fn carries_body_rules() {
        let declared = ParsedResponse::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n").unwrap();
        assert!(declared.carries_body("GET"));
        assert!(!declared.carries_body("HEAD"));

        let empty = ParsedResponse::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert!(!empty.carries_body("GET"));

        let chunked =
            ParsedResponse::parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
        assert!(chunked.carries_body("GET"));

        let not_modified =
            ParsedResponse::parse(b"HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n").unwrap();
        assert!(!not_modified.carries_body("GET"));
    }

    #[test]
    fn find_header_end_offsets() {
        assert_eq!(find_header_end(b"a\r\n\r\nbody"), Some(5));
        assert_eq!(find_header_end(b"a\r\n"), None);
    }
}
