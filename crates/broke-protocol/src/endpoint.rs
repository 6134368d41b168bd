use crate::{ProtocolError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Transport address a router binds and dealers connect to.
///
/// - `tcp://<host>:<port>` for TCP networking (`*` binds every interface)
/// - `ipc://<path>` for a Unix domain socket
/// - `inproc://<name>` for a channel inside the current process
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(String),
    Ipc(PathBuf),
    Inproc(String),
}

impl Endpoint {
    /// Socket address to hand to the OS, with `*` expanded
    pub(crate) fn tcp_bind_address(host_port: &str) -> String {
        match host_port.strip_prefix("*:") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => host_port.to_string(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| ProtocolError::InvalidEndpoint(s.to_string()))?;

        if rest.is_empty() {
            return Err(ProtocolError::InvalidEndpoint(s.to_string()));
        }

        match scheme {
            "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| ProtocolError::InvalidEndpoint(s.to_string()))?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(ProtocolError::InvalidEndpoint(s.to_string()));
                }
                Ok(Endpoint::Tcp(rest.to_string()))
            }
            "ipc" => Ok(Endpoint::Ipc(PathBuf::from(rest))),
            "inproc" => Ok(Endpoint::Inproc(rest.to_string())),
            _ => Err(ProtocolError::InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp://{}", address),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{}", name),
        }
    }
}
