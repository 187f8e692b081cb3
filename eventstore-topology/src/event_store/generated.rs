pub mod gossip;
pub mod shared;
