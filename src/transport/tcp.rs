// MIT License - Copyright (c) 2026 Peter Wright
// TCP connections to IP150 modules

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::{ParadoxError, Result};

/// Open the serial-over-TCP link (ser2net or an IP-to-serial bridge).
pub async fn connect(host: &str, port: u16, limit: Duration) -> Result<TcpStream> {
    info!("Connecting to panel at {}:{}", host, port);
    let stream = match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("TCP connect failed: {}", e);
            return Err(ParadoxError::Io(e));
        }
        Err(_) => {
            return Err(ParadoxError::Timeout {
                what: format!("TCP connect to {host}:{port}"),
            })
        }
    };
    stream.set_nodelay(true)?;
    debug!("TCP socket connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
