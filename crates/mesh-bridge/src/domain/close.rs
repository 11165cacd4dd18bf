//! Close codes the bridge sends to WebSocket clients.
//!
//! Clients rely on these codes to decide whether to reconnect, so the mapping
//! is part of the bridge's external contract:
//!
//! | Code | Meaning                                            |
//! |------|----------------------------------------------------|
//! | 1001 | the bridge is shutting down                        |
//! | 1011 | device disconnected or a frame could not be relayed|
//! | 1013 | device not ready yet, try again later              |

/// RFC 6455 "going away".
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// RFC 6455 "internal error" / unexpected condition.
pub const CLOSE_UNEXPECTED_CONDITION: u16 = 1011;
/// RFC 6455 "try again later".
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Why the bridge is closing a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Process shutdown.
    ServerShutdown,
    /// The radio dropped off the serial port.
    DeviceDisconnected,
    /// A client sent a frame while the link was not connected.
    DeviceNotReady,
    /// Writing the client's frame to the radio failed.
    ForwardFailed,
    /// The client connected while the link was not connected.
    AdmissionRejected,
}

impl CloseReason {
    /// WebSocket close code sent on the wire.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::ServerShutdown => CLOSE_GOING_AWAY,
            CloseReason::DeviceDisconnected
            | CloseReason::DeviceNotReady
            | CloseReason::ForwardFailed => CLOSE_UNEXPECTED_CONDITION,
            CloseReason::AdmissionRejected => CLOSE_TRY_AGAIN_LATER,
        }
    }

    /// Human-readable reason sent alongside the code.
    pub fn reason(self) -> &'static str {
        match self {
            CloseReason::ServerShutdown => "Server shutting down",
            CloseReason::DeviceDisconnected => "Serial device disconnected",
            CloseReason::DeviceNotReady | CloseReason::AdmissionRejected => {
                "Serial port not ready"
            }
            CloseReason::ForwardFailed => "Failed to forward frame",
        }
    }
}
