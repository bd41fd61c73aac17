//! Canned responses the proxy writes itself.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use tollgate_core::session::LOGIN_PAGE_HTML;

/// Reply to a CONNECT once the upstream socket is open.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        303 => "See Other",
        400 => "Bad Request",
        401 => "Unauthorized",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        502 => "Bad Gateway",
        _ => "Error",
    }
}

/// A bare status line with no headers and no body.
pub fn status_line(status: u16) -> String {
    format!("HTTP/1.1 {} {}\r\n\r\n", status, reason_phrase(status))
}

/// The login form.
pub fn login_page() -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        LOGIN_PAGE_HTML.len(),
        LOGIN_PAGE_HTML
    )
}

/// Redirect sent after a successful login.
pub fn see_other(location: &str) -> String {
    format!(
        "HTTP/1.1 303 See Other\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        location
    )
}

/// Writes `bytes` and flushes.
pub async fn send<W>(stream: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}

/// Writes a bare status line and flushes.
pub async fn send_status<W>(stream: &mut W, status: u16) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    send(stream, status_line(status).as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::ParsedResponse;

    #[test]
    fn status_lines() {
        assert_eq!(status_line(401), "HTTP/1.1 401 Unauthorized\r\n\r\n");
        assert_eq!(status_line(405), "HTTP/1.1 405 Method Not Allowed\r\n\r\n");
        assert_eq!(status_line(599), "HTTP/1.1 599 Error\r\n\r\n");
    }

    #[test]
    fn login_page_is_a_complete_response() {
        let page = login_page();
        let response = ParsedResponse::parse(page.as_bytes()).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("Content-Type"), Some("text/html"));
        assert_eq!(
            response.headers.content_length(),
            Some(response.body.len() as u64)
        );
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains(r#"<form method="POST" action="/">"#));
        assert!(body.contains(r#"name="token""#));
    }

    #[test]
    fn see_other_points_at_target() {
        let response = ParsedResponse::parse(see_other("http://example.com/a").as_bytes()).unwrap();
        assert_eq!(response.status, 303);
        assert_eq!(response.headers.get("Location"), Some("http://example.com/a"));
    }

    #[tokio::test]
    async fn send_status_writes_line() {
        let mut out = Vec::new();
        send_status(&mut out, 502).await.unwrap();
        assert_eq!(out, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
    }
}
