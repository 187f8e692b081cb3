pub mod gossip {
    pub use super::super::generated::gossip::*;
}

pub mod shared {
    pub use super::super::generated::shared::*;
}
