//! Common types used across the library.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::Status;

use crate::operations::gossip::VNodeState;

pub(crate) const DEFAULT_PORT: u16 = 2_113;

/// Holds login and password information.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub(crate) login: String,
    pub(crate) password: String,
}

impl Credentials {
    /// Creates a new `Credentials` instance.
    pub fn new<S>(login: S, password: S) -> Credentials
    where
        S: Into<String>,
    {
        Credentials {
            login: login.into(),
            password: password.into(),
        }
    }

    pub fn login(&self) -> &str {
        self.login.as_str()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Indicates which order of preferred nodes for connecting to.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodePreference {
    /// When attempting connection, prefers leader nodes.
    #[default]
    Leader,

    /// When attempting connection, prefers follower nodes.
    Follower,

    /// When attempting connection, has no node preference.
    Random,

    /// When attempting connection, prefers read-replica nodes.
    ReadOnlyReplica,
}

impl NodePreference {
    /// Ranks a node state for this preference. Lower is better. States that are not
    /// ranked by the preference get `u32::MAX` so they never win over a known role.
    pub fn priority(self, state: VNodeState) -> u32 {
        use self::NodePreference::*;

        match (self, state) {
            (Random, _) => 0,

            (Leader, VNodeState::Leader) => 0,
            (Leader, VNodeState::Follower) => 1,
            (Leader, VNodeState::ReadOnlyReplica) => 2,
            (Leader, VNodeState::PreReadOnlyReplica) => 3,
            (Leader, VNodeState::ReadOnlyLeaderless) => 4,

            (Follower, VNodeState::Follower) => 0,
            (Follower, VNodeState::Leader) => 1,
            (Follower, VNodeState::ReadOnlyReplica) => 2,
            (Follower, VNodeState::PreReadOnlyReplica) => 3,
            (Follower, VNodeState::ReadOnlyLeaderless) => 4,

            (ReadOnlyReplica, VNodeState::ReadOnlyReplica) => 0,
            (ReadOnlyReplica, VNodeState::PreReadOnlyReplica) => 1,
            (ReadOnlyReplica, VNodeState::ReadOnlyLeaderless) => 2,
            (ReadOnlyReplica, VNodeState::Leader) => 3,
            (ReadOnlyReplica, VNodeState::Follower) => 4,

            _ => u32::MAX,
        }
    }
}

impl std::fmt::Display for NodePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use self::NodePreference::*;

        match self {
            Leader => write!(f, "Leader"),
            Follower => write!(f, "Follower"),
            Random => write!(f, "Random"),
            ReadOnlyReplica => write!(f, "ReadOnlyReplica"),
        }
    }
}

/// A node address as found in the settings or reported by gossip.
#[derive(Debug, Clone, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Where a connection to an [`Endpoint`] actually goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ipv4(SocketAddr),
    Ipv6(SocketAddr),
    /// The host is not an IP literal and needs to be resolved through DNS.
    Dns { host: String, port: u16 },
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Creates an endpoint listening on the default EventStoreDB port (2113).
    pub fn from_host(host: impl Into<String>) -> Self {
        Endpoint::new(host, DEFAULT_PORT)
    }

    pub fn target(&self) -> Target {
        if let Ok(addr) = self.host.parse::<Ipv4Addr>() {
            return Target::Ipv4(SocketAddr::new(IpAddr::V4(addr), self.port));
        }

        let unbracketed = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(self.host.as_str());

        if let Ok(addr) = unbracketed.parse::<Ipv6Addr>() {
            return Target::Ipv6(SocketAddr::new(IpAddr::V6(addr), self.port));
        }

        Target::Dns {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target() {
            Target::Ipv6(addr) => write!(f, "{}", addr),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

#[derive(Error, Debug)]
/// EventStoreDB client error.
pub enum Error {
    #[error("Cluster mode requires at least one gossip seed")]
    EmptySeeds,
    #[error("Invalid client settings: {0}")]
    InvalidSettings(String),
    #[error("Max discovery attempt count reached. count: {0}")]
    MaxDiscoveryAttemptReached(usize),
    #[error("Malformed gossip response: {0}")]
    GossipDecode(String),
    #[error("Server-side error: {0}")]
    ServerError(String),
    #[error("You tried to execute a command that requires a leader node on a follower node. New leader: {0}")]
    NotLeaderException(Endpoint),
    #[error("Unmapped gRPC error: {0}.")]
    Grpc(Status),
    #[error("Connection is closed.")]
    ConnectionClosed,
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl Error {
    pub fn from_grpc(status: Status) -> Self {
        match status.code() {
            tonic::Code::Unavailable => Error::ServerError(status.message().to_string()),
            _ => {
                let metadata = status.metadata();
                if let Some("not-leader") = metadata.get("exception").and_then(|e| e.to_str().ok())
                {
                    let endpoint = metadata
                        .get("leader-endpoint-host")
                        .zip(metadata.get("leader-endpoint-port"))
                        .and_then(|(host, port)| {
                            let host = host.to_str().ok()?;
                            let port = port.to_str().ok()?;
                            let host = host.to_string();
                            let port = port.parse().ok()?;

                            Some(Endpoint { host, port })
                        });

                    if let Some(leader) = endpoint {
                        return Error::NotLeaderException(leader);
                    }
                }

                Error::Grpc(status)
            }
        }
    }

    /// Errors caused by the selected node rather than by the request itself.
    pub fn is_node_failure(&self) -> bool {
        matches!(self, Error::ServerError(_) | Error::NotLeaderException(_))
    }
}

pub type Result<A> = std::result::Result<A, Error>;
