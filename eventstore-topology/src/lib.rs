//! Cluster topology resolution and node selection for EventStoreDB/KurrentDB gRPC clients.
//!
//! A [`NodeSelector`] decides which node the next call goes to. In standalone mode that's always
//! the configured node. In cluster mode (DNS discovery or gossip seeds) the selector reads
//! gossip from the seeds, ranks the members with the configured [`NodePreference`] and keeps its
//! choice for the discovery interval. [`Client`] wraps the selector and replays calls once when
//! the selected node goes away.
#[macro_use]
extern crate log;

mod client;
mod event_store;
mod grpc;
mod operations;
pub mod options;
mod request;
mod selector;
mod settings;
mod types;

pub use client::Client;
pub use operations::{GossipClient, GossipError, GrpcGossipClient, MemberInfo, VNodeState};
pub use options::retry::RetryOptions;
pub use selector::{Handle, NodeSelector};
pub use settings::{ClientSettings, TopologyClusterMode};
pub use types::*;
