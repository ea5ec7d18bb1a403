pub mod constants;
pub mod envelope;
pub mod result;

// Re-export primary types for convenience.
pub use constants::ChannelRole;
pub use envelope::{RelayReply, RelayRequest};
pub use result::{CallResult, Content};
