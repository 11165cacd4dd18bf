//! # mesh-core
//!
//! Shared library for the MeshCore radio bridge containing the serial frame
//! codec and the device transport contract.
//!
//! The bridge never looks inside a radio frame.  What it does need is a way to
//! talk to the companion radio over a serial port and a stable seam that lets
//! the relay logic be tested without hardware.  This crate provides both:
//!
//! - **`protocol`** – How frames travel over the serial line.  Each frame is a
//!   one-byte direction marker, a little-endian `u16` length and the opaque
//!   payload.
//!
//! - **`transport`** – The [`RadioTransport`] trait (connect / send / close
//!   plus an ordered event stream), the tokio-serial implementation used in
//!   production, and an in-memory mock used by the bridge's tests.

pub mod protocol;
pub mod transport;

pub use protocol::frame::{encode_to_radio, Frame, FrameDecoder, FrameError};
pub use transport::{
    EventReceiver, RadioTransport, SerialTransportFactory, TransportError, TransportEvent,
    TransportFactory,
};
