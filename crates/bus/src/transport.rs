use serde::{Deserialize, Serialize};

/// Directory holding the IPC socket files for same-host deployments.
const IPC_ROOT: &str = "/tmp/lookout";

/// Transport layer for broker connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket under [`IPC_ROOT`], addressed by name.
    Ipc(String),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// The ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_ROOT}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// Make sure the IPC socket directory exists before binding.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if matches!(self, Self::Ipc(_)) {
            std::fs::create_dir_all(IPC_ROOT)?;
        }
        Ok(())
    }

    /// Remove a stale socket file left behind by an unclean shutdown.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(name) = self {
            match std::fs::remove_file(format!("{IPC_ROOT}/{name}.sock")) {
                Ok(()) => {}
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("broker");
        assert_eq!(t.endpoint(), "ipc:///tmp/lookout/broker.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 5672);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:5672");
    }

    #[test]
    fn display_matches_endpoint() {
        let t = Transport::tcp("localhost", 9090);
        assert_eq!(t.to_string(), t.endpoint());
    }
}
