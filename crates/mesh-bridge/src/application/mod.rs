//! Application layer for mesh-bridge.
//!
//! Knows *what* the relay does with frames and clients, and leaves sockets,
//! TLS and signals to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Owning the single device connection and its retry/reconnect policy
//! - Publishing the link state
//! - Tracking attached clients, broadcasting device frames, closing clients
//! - Deciding admission and forwarding for each client session

pub mod bridge_service;
pub mod client_registry;
pub mod device_link;
pub mod link_status;

pub use bridge_service::BridgeService;
pub use client_registry::{ClientHandle, ClientId, ClientMailbox, ClientRegistry};
pub use device_link::{DeviceLink, LinkError};
pub use link_status::LinkStatus;
