//! Raw TCP peers for exercising transport failures that a well-behaved
//! HTTP server never produces.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Reads one full HTTP request (headers and `content-length` body).
/// Returns `None` if the peer closes first.
pub async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return Some(text.into_owned());
            }
        }
    }
}

/// Waits until the peer closes its side of the connection.
pub async fn wait_for_close(stream: &mut TcpStream) {
    let mut chunk = [0u8; 256];
    while let Ok(n) = stream.read(&mut chunk).await {
        if n == 0 {
            return;
        }
    }
}
