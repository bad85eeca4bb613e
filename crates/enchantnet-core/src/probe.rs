//! Local connectivity probe.
//!
//! A forwarded port is considered reachable when a loopback connection to it
//! answers the `0xFE` ping byte with `0xFF`.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Byte sent to the probed port.
pub const PROBE_REQUEST: u8 = 0xFE;

/// Byte expected back.
pub const PROBE_RESPONSE: u8 = 0xFF;

/// Probe `127.0.0.1:port`. Any error or timeout counts as unreachable.
pub async fn check_port(port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match tokio::time::timeout(timeout, exchange(addr)).await {
        Ok(Ok(byte)) => {
            tracing::debug!(port, response = byte, "Probe answered");
            byte == PROBE_RESPONSE
        }
        Ok(Err(e)) => {
            tracing::debug!(port, error = %e, "Probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(port, ?timeout, "Probe timed out");
            false
        }
    }
}

async fn exchange(addr: SocketAddr) -> std::io::Result<u8> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&[PROBE_REQUEST]).await?;
    stream.flush().await?;
    stream.read_u8().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn responder(reply: u8) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = socket.read_u8().await.unwrap();
            assert_eq!(request, PROBE_REQUEST);
            socket.write_all(&[reply]).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_probe_success() {
        let port = responder(PROBE_RESPONSE).await;
        assert!(check_port(port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_probe_wrong_reply() {
        let port = responder(0x00).await;
        assert!(!check_port(port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!check_port(port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_probe_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });
        assert!(!check_port(port, Duration::from_millis(200)).await);
    }
}
