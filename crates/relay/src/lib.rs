//! Pairing and call relay engine.
//!
//! The relay listens on a loopback WebSocket port with two endpoints: an
//! authenticated control channel that proves the browser peer is alive,
//! and a data channel, gated on the control channel, that carries relayed
//! calls and their correlated replies. When a call arrives while no peer
//! is paired, the relay launches the peer and waits a bounded time for it
//! to connect back.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod pairing;
pub mod relay;
pub mod server;
pub mod state;
pub mod token;

pub use connection::{ChannelHandler, ConnectionId, PeerConnection};
pub use correlator::Correlator;
pub use error::{LaunchError, RelayError, ServerError};
pub use pairing::{PairingManager, PeerLauncher};
pub use relay::Relay;
pub use server::{ChannelServer, ServerConfig};
pub use state::{Admission, RelayCore, RelayEvent, RelayState};
pub use token::generate_token;

/// Outbound frame buffer per peer connection.
pub const SEND_BUFFER_SIZE: usize = 256;
