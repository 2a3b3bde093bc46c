pub mod channel;
pub mod protocol;

pub use channel::{ChunkBuffer, DeliveryFeed, DeliveryHub};
pub use protocol::{ClientFrame, ServerFrame};
