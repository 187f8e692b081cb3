use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::{Request, Status};
use uuid::Uuid;

use crate::event_store::client::{gossip as wire, shared};
use crate::request::build_request_metadata;
use crate::types::Endpoint;
use crate::ClientSettings;

/// Queries a single node for its view of the cluster.
///
/// Implementations must give up after `timeout`, return the whole member list at once and skip
/// members they can't decode instead of failing the entire response.
#[async_trait]
pub trait GossipClient: Send + Sync + 'static {
    async fn read(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Vec<MemberInfo>, GossipError>;
}

#[derive(Error, Debug)]
pub enum GossipError {
    #[error("Gossip request timed out")]
    Timeout,
    #[error("Gossip gRPC error: {0}")]
    Grpc(Status),
    #[error("Gossip transport error: {0}")]
    Transport(String),
    #[error("Malformed gossip response: {0}")]
    Decode(String),
}

impl From<GossipError> for crate::Error {
    fn from(e: GossipError) -> Self {
        match e {
            GossipError::Decode(msg) => crate::Error::GossipDecode(msg),
            GossipError::Grpc(status) => crate::Error::from_grpc(status),
            GossipError::Timeout => crate::Error::ServerError("gossip request timed out".into()),
            GossipError::Transport(msg) => crate::Error::ServerError(msg),
        }
    }
}

/// Reads gossip through the `event_store.client.gossip.Gossip/Read` RPC.
#[derive(Clone)]
pub struct GrpcGossipClient {
    settings: ClientSettings,
}

impl GrpcGossipClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl GossipClient for GrpcGossipClient {
    async fn read(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Vec<MemberInfo>, GossipError> {
        let channel = tonic::transport::Endpoint::from_shared(endpoint.url())
            .map_err(|e| GossipError::Transport(e.to_string()))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect()
            .await
            .map_err(|e| GossipError::Transport(e.to_string()))?;

        let mut inner = wire::gossip_client::GossipClient::new(channel);
        let mut req = Request::new(());

        *req.metadata_mut() = build_request_metadata(&self.settings);

        debug!("Before reading gossip from {}", endpoint);
        let info = inner.read(req).await.map_err(GossipError::Grpc)?.into_inner();
        debug!("After receiving gossip from {}", endpoint);

        decode_cluster_info(info)
    }
}

/// Decodes a gossip response. Undecodable members are skipped; the response only fails when
/// none of its members could be decoded.
pub(crate) fn decode_cluster_info(info: wire::ClusterInfo) -> Result<Vec<MemberInfo>, GossipError> {
    let total = info.members.len();
    let mut members = Vec::with_capacity(total);
    let mut last_error = None;

    for wire_member in info.members {
        match MemberInfo::try_from(wire_member) {
            Ok(member) => members.push(member),
            Err(e) => {
                warn!("Skipping gossip member: {}", e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if members.is_empty() => Err(e),
        _ => Ok(members),
    }
}

fn uuid_from_structured(most: u64, least: u64) -> Uuid {
    let repr = (most as u128) << 64 | least as u128;

    Uuid::from_u128(repr)
}

impl TryFrom<shared::Uuid> for Uuid {
    type Error = GossipError;

    fn try_from(value: shared::Uuid) -> Result<Self, Self::Error> {
        match value.value {
            Some(shared::uuid::Value::Structured(repr)) => Ok(uuid_from_structured(
                repr.most_significant_bits as u64,
                repr.least_significant_bits as u64,
            )),

            Some(shared::uuid::Value::String(str)) => Uuid::parse_str(str.as_str())
                .map_err(|e| GossipError::Decode(format!("invalid instance id '{}': {}", str, e))),

            None => Ok(Uuid::nil()),
        }
    }
}

impl TryFrom<wire::MemberInfo> for MemberInfo {
    type Error = GossipError;

    fn try_from(wire_member: wire::MemberInfo) -> Result<Self, Self::Error> {
        let instance_id = match wire_member.instance_id {
            Some(wire_uuid) => wire_uuid.try_into()?,
            None => Uuid::nil(),
        };

        let http_end_point = if let Some(endpoint) = wire_member.http_end_point {
            let port = u16::try_from(endpoint.port).map_err(|_| {
                GossipError::Decode(format!(
                    "member {} reported an invalid port {}",
                    instance_id, endpoint.port
                ))
            })?;

            Endpoint::new(endpoint.address, port)
        } else {
            return Err(GossipError::Decode(format!(
                "member {} has no HTTP endpoint",
                instance_id
            )));
        };

        Ok(MemberInfo {
            instance_id,
            time_stamp: wire_member.time_stamp,
            state: VNodeState::from_i32(wire_member.state),
            is_alive: wire_member.is_alive,
            http_end_point,
        })
    }
}

/// A cluster member as reported by gossip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub instance_id: Uuid,
    pub time_stamp: i64,
    pub state: VNodeState,
    pub is_alive: bool,
    pub http_end_point: Endpoint,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VNodeState {
    Initializing,
    DiscoverLeader,
    Unknown,
    PreReplica,
    CatchingUp,
    Clone,
    Follower,
    PreLeader,
    Leader,
    Manager,
    ShuttingDown,
    Shutdown,
    ReadOnlyLeaderless,
    PreReadOnlyReplica,
    ReadOnlyReplica,
    ResigningLeader,
    /// A state this client doesn't know about, as sent by the server.
    Unrecognized(i32),
}

impl VNodeState {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => VNodeState::Initializing,
            1 => VNodeState::DiscoverLeader,
            2 => VNodeState::Unknown,
            3 => VNodeState::PreReplica,
            4 => VNodeState::CatchingUp,
            5 => VNodeState::Clone,
            6 => VNodeState::Follower,
            7 => VNodeState::PreLeader,
            8 => VNodeState::Leader,
            9 => VNodeState::Manager,
            10 => VNodeState::ShuttingDown,
            11 => VNodeState::Shutdown,
            12 => VNodeState::ReadOnlyLeaderless,
            13 => VNodeState::PreReadOnlyReplica,
            14 => VNodeState::ReadOnlyReplica,
            15 => VNodeState::ResigningLeader,
            unknown => VNodeState::Unrecognized(unknown),
        }
    }
}
