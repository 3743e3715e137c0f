mod coordinator;
mod hub;
pub mod messages;
mod peer;
mod registry;
mod relay;

pub use coordinator::{RoomEvent, RoomSnapshot, SessionSnapshot};
pub use hub::SessionHub;
pub use peer::{PeerSession, SessionKey, SessionState};
pub use registry::RoomRegistry;
pub use relay::{SignalingRelay, Transport};
