//! Serial wire protocol for the companion radio.

pub mod frame;

pub use frame::{
    decode_from_radio, encode_to_radio, Frame, FrameDecoder, FrameError, FROM_RADIO_MARKER,
    HEADER_SIZE, MAX_PAYLOAD_LEN, TO_RADIO_MARKER,
};
