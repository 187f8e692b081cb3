use std::fmt::Formatter;
use std::time::Duration;

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Credentials, Endpoint, NodePreference};

/// How the client finds the node it talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyClusterMode {
    /// A single node. No gossip is ever performed.
    Standalone(Endpoint),
    /// A domain name that resolves to the cluster nodes. Gossip is read through it.
    Dns(Endpoint),
    /// A fixed set of gossip seeds, tried in order.
    Seeds(Vec<Endpoint>),
}

impl TopologyClusterMode {
    /// Picks a cluster mode out of a host list the way connection strings describe it: DNS
    /// discovery uses the first host, several hosts are gossip seeds and a single host is a
    /// standalone node.
    pub fn from_hosts(dns_discover: bool, mut hosts: Vec<Endpoint>) -> crate::Result<Self> {
        if hosts.is_empty() {
            return Err(crate::Error::EmptySeeds);
        }

        if dns_discover {
            return Ok(TopologyClusterMode::Dns(hosts.swap_remove(0)));
        }

        if hosts.len() > 1 {
            return Ok(TopologyClusterMode::Seeds(hosts));
        }

        Ok(TopologyClusterMode::Standalone(hosts.swap_remove(0)))
    }

    pub fn is_standalone(&self) -> bool {
        matches!(self, TopologyClusterMode::Standalone(_))
    }

    /// Endpoints a discovery round goes through, in order.
    pub(crate) fn seeds(&self) -> Vec<Endpoint> {
        match self {
            TopologyClusterMode::Standalone(endpoint) | TopologyClusterMode::Dns(endpoint) => {
                vec![endpoint.clone()]
            }
            TopologyClusterMode::Seeds(seeds) => seeds.clone(),
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if let TopologyClusterMode::Seeds(seeds) = self {
            if seeds.is_empty() {
                return Err(crate::Error::EmptySeeds);
            }
        }

        Ok(())
    }
}

impl Default for TopologyClusterMode {
    fn default() -> Self {
        TopologyClusterMode::Standalone(Endpoint::from_host("localhost"))
    }
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "duration in milliseconds")
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if v < 0 {
            return Err(E::custom(format!("negative duration: {}", v)));
        }

        Ok(Duration::from_millis(v as u64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Duration::from_millis(v))
    }
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(value.as_millis() as u64)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

fn default_max_discover_attempts() -> usize {
    ClientSettings::default().max_discover_attempts
}

fn default_discovery_interval() -> Duration {
    ClientSettings::default().discovery_interval
}

fn default_gossip_timeout() -> Duration {
    ClientSettings::default().gossip_timeout
}

fn default_preference() -> NodePreference {
    ClientSettings::default().preference
}

/// Gathers all the settings node selection depends on.
///
/// Settings can be built in code:
///
/// ```
/// # use eventstore_topology::{ClientSettings, Endpoint, NodePreference};
/// let setts = ClientSettings::seeds(vec![
///     Endpoint::new("localhost", 1111),
///     Endpoint::new("localhost", 2222),
///     Endpoint::new("localhost", 3333),
/// ])
/// .with_node_preference(NodePreference::Follower);
/// ```
///
/// or loaded from any serde format. Durations are expressed in milliseconds and every setting
/// not mentioned keeps its default value:
///
/// * `max_discover_attempts`: default `3`. Maximum number of discovery rounds before node
///    selection gives up.
///
/// * `discovery_interval`: default `500ms`. How long a selected node is reused before gossip
///    is read again. Also the waiting period between two discovery rounds.
///
/// * `gossip_timeout`: default `3s`. Waiting period before a gossip request times out.
///
/// * `preference`: default `leader`. Supported values are `leader`, `follower`,
///    `readOnlyReplica` and `random`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub(crate) cluster_mode: TopologyClusterMode,
    #[serde(default = "default_max_discover_attempts")]
    pub(crate) max_discover_attempts: usize,
    #[serde(
        default = "default_discovery_interval",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub(crate) discovery_interval: Duration,
    #[serde(
        default = "default_gossip_timeout",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub(crate) gossip_timeout: Duration,
    #[serde(default = "default_preference")]
    pub(crate) preference: NodePreference,
    #[serde(default)]
    pub(crate) default_user_name: Option<Credentials>,
    #[serde(default)]
    pub(crate) connection_name: Option<String>,
}

impl ClientSettings {
    pub fn new(cluster_mode: TopologyClusterMode) -> Self {
        ClientSettings {
            cluster_mode,
            ..Default::default()
        }
    }

    pub fn standalone(endpoint: Endpoint) -> Self {
        ClientSettings::new(TopologyClusterMode::Standalone(endpoint))
    }

    pub fn dns(domain: Endpoint) -> Self {
        ClientSettings::new(TopologyClusterMode::Dns(domain))
    }

    pub fn seeds(seeds: Vec<Endpoint>) -> Self {
        ClientSettings::new(TopologyClusterMode::Seeds(seeds))
    }

    pub fn with_node_preference(self, preference: NodePreference) -> Self {
        Self { preference, ..self }
    }

    pub fn with_max_discover_attempts(self, max_discover_attempts: usize) -> Self {
        Self {
            max_discover_attempts,
            ..self
        }
    }

    pub fn with_discovery_interval(self, discovery_interval: Duration) -> Self {
        Self {
            discovery_interval,
            ..self
        }
    }

    pub fn with_gossip_timeout(self, gossip_timeout: Duration) -> Self {
        Self {
            gossip_timeout,
            ..self
        }
    }

    pub fn with_default_credentials(self, credentials: Credentials) -> Self {
        Self {
            default_user_name: Some(credentials),
            ..self
        }
    }

    pub fn with_connection_name(self, name: impl Into<String>) -> Self {
        Self {
            connection_name: Some(name.into()),
            ..self
        }
    }

    pub fn cluster_mode(&self) -> &TopologyClusterMode {
        &self.cluster_mode
    }

    pub fn max_discover_attempts(&self) -> usize {
        self.max_discover_attempts
    }

    pub fn discovery_interval(&self) -> Duration {
        self.discovery_interval
    }

    pub fn gossip_timeout(&self) -> Duration {
        self.gossip_timeout
    }

    pub fn node_preference(&self) -> NodePreference {
        self.preference
    }

    pub fn default_authenticated_user(&self) -> &Option<Credentials> {
        &self.default_user_name
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection_name.as_deref()
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        self.cluster_mode.validate()?;

        if self.max_discover_attempts == 0 {
            return Err(crate::Error::InvalidSettings(
                "max_discover_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            cluster_mode: Default::default(),
            max_discover_attempts: 3,
            discovery_interval: Duration::from_millis(500),
            gossip_timeout: Duration::from_secs(3),
            preference: Default::default(),
            default_user_name: None,
            connection_name: None,
        }
    }
}
