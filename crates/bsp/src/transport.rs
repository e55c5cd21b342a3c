use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BspError;

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets.
    /// Fastest option for same-host clusters.
    Ipc(String),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create an IPC transport with the given socket name.
    ///
    /// The name is used as a path component under `/tmp/lockstep/`.
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    /// Create a TCP transport with the given host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string like "ipc:///tmp/lockstep/foo.sock" or
    /// "tcp://host:port".
    pub fn parse(endpoint: &str) -> Result<Self, BspError> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            let name = Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    BspError::Transport(format!("invalid IPC endpoint '{endpoint}'"))
                })?;
            Ok(Self::ipc(name))
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let (host, port_str) = addr.rsplit_once(':').ok_or_else(|| {
                BspError::Transport(format!("tcp endpoint '{endpoint}' is missing a port"))
            })?;
            let port = port_str.parse().map_err(|_| {
                BspError::Transport(format!("invalid port in tcp endpoint '{endpoint}'"))
            })?;
            Ok(Self::tcp(host, port))
        } else {
            Err(BspError::Transport(format!(
                "unsupported endpoint scheme '{endpoint}', expected ipc:// or tcp://"
            )))
        }
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/lockstep/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, ensure the parent directory exists.
    ///
    /// ZeroMQ requires the directory to exist before binding an IPC socket.
    /// This is a no-op for TCP transports.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            // Strip the "ipc://" prefix to get the filesystem path.
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left over from a previous run.
    ///
    /// ZeroMQ IPC sockets are regular files — if the process exits without
    /// cleanup, the `.sock` file persists and causes `EADDRINUSE` on next bind.
    /// This is a no-op for TCP transports or if the file doesn't exist.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

/// Delay between connect attempts while the remote side is still binding.
const CONNECT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(250);
const CONNECT_MAX_ATTEMPTS: u32 = 40;

/// Connect a socket, retrying while the remote endpoint comes up.
///
/// `connect` fails immediately when nothing is bound at the endpoint yet,
/// and peers in a cluster start concurrently, so early connects routinely
/// race the remote bind.
pub(crate) async fn connect_with_retry<S: zeromq::Socket>(
    socket: &mut S,
    endpoint: &str,
) -> Result<(), BspError> {
    let mut attempt = 0;
    loop {
        match socket.connect(endpoint).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < CONNECT_MAX_ATTEMPTS => {
                attempt += 1;
                tracing::debug!(endpoint, attempt, error = %e, "connect failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => {
                tracing::error!(endpoint, error = %e, "connect failed after {attempt} retries");
                return Err(e.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("conductor");
        assert_eq!(t.endpoint(), "ipc:///tmp/lockstep/conductor.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 7400);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:7400");
    }

    #[test]
    fn display_matches_endpoint() {
        let t = Transport::tcp("localhost", 9090);
        assert_eq!(t.to_string(), t.endpoint());
    }

    #[test]
    fn parse_ipc_roundtrips() {
        let t = Transport::parse("ipc:///tmp/lockstep/peer-0.sock").unwrap();
        assert_eq!(t.endpoint(), "ipc:///tmp/lockstep/peer-0.sock");
    }

    #[test]
    fn parse_tcp_roundtrips() {
        let t = Transport::parse("tcp://10.0.0.1:7401").unwrap();
        assert_eq!(t, Transport::tcp("10.0.0.1", 7401));
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!(Transport::parse("tcp://10.0.0.1").is_err());
    }

    #[test]
    fn parse_rejects_unknown_scheme() {
        assert!(Transport::parse("udp://10.0.0.1:7401").is_err());
    }
}
