pub(crate) mod gossip;

pub use gossip::{GossipClient, GossipError, GrpcGossipClient, MemberInfo, VNodeState};
