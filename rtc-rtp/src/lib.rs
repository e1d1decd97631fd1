//! RTP wire format for the send path.
//!
//! * [`header`] and [`packet`]: RFC 3550 fixed header, CSRC list, RFC 5285
//!   one-byte header extensions, and RTP padding.
//! * [`extension`]: the header-extension id registry and the payload codecs
//!   for transmission-time-offset, abs-send-time, audio-level, video
//!   orientation and transport-wide sequence numbers.
//! * [`sequence`]: wrap-aware 16-bit sequence number space.
//! * [`packetizer`]: pluggable payloaders and the generic video payloader.
#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod extension;
pub mod header;
pub mod packet;
pub mod packetizer;
pub mod sequence;

pub use header::Header;
pub use packet::Packet;
