//! Charm store access: channel maps and releases.
pub mod charmhub;
pub mod traits;
pub mod types;

pub use charmhub::Charmhub;
pub use traits::CharmStore;
pub use types::{Base, Channel, ChannelRelease};
