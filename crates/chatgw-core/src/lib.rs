//! chatgw-core: Shared protocol library for the chat gateway.
//!
//! Provides the line-delimited wire codec (outbound commands, inbound
//! frames) and the error taxonomy shared with the server crate.

pub mod codec;
pub mod error;
pub mod frame;

// Re-export commonly used items at crate root.
pub use codec::{sanitize, Command};
pub use error::{GatewayError, GatewayResult};
pub use frame::{Frame, FrameKind};
