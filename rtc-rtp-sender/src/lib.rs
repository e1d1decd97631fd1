//! RTC RTP Sender - send side of an RTP stream with loss recovery.
//!
//! [`RtpSender`] packetizes encoded audio and video frames, stamps the
//! header extensions, and keeps every packet it sends in a bounded
//! [`PacketHistory`] so that it can answer NACKs.
//!
//! # Loss recovery
//!
//! | Mechanism | Description |
//! |-----------|-------------|
//! | Retransmission | NACKed packets are resent from the history, rate limited by [`NackController`] |
//! | RTX (RFC 4588) | Resends go out on a separate SSRC with the original sequence number in front of the payload |
//! | ULPFEC (RFC 5109) | [`FecProducer`] XORs media packets into parity packets carried in RED (RFC 2198) |
//! | Padding | The pacer fills the link with old payloads over RTX or with padding-only packets |
//!
//! # Threads
//!
//! The sender is `Send + Sync`. The encoder calls
//! [`RtpSender::send_outgoing_data`], the pacer calls
//! [`RtpSender::time_to_send_packet`] and [`RtpSender::time_to_send_padding`],
//! and RTCP feedback arrives through [`RtpSender::on_received_nack`]. Time is
//! read from an injected [`Clock`](shared::time::Clock), so tests can drive
//! the sender with a simulated one.
//!
//! ```text
//! frame ─→ payloader ─→ [FEC + RED] ─→ PacketHistory ─→ pacer ─→ Transport
//!                                           ↑
//!                             NACK ─────────┘ (optionally over RTX)
//! ```
#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod config;
pub mod fec;
pub mod history;
pub mod nack;
pub mod observer;
pub mod packet_to_send;
pub mod padding;
pub mod payload_registry;
pub mod rate;
pub mod rtx;
pub mod sender;
pub mod ssrc;

pub use config::RtpSenderConfig;
pub use fec::{FecMaskType, FecProducer, FecProtectionParams};
pub use history::{PacketHistory, PacketState, StorageMode, StorageType};
pub use nack::NackController;
pub use observer::{
    BitrateStatistics, BitrateStatisticsObserver, FrameCountObserver, FrameCounts, PacedSender,
    PacketPriority, RtpPacketCounter, SendPacketObserver, SendSideDelayObserver,
    StreamDataCounters, Transport,
};
pub use packet_to_send::{PacketKind, RtpPacketToSend};
pub use payload_registry::VideoCodecType;
pub use rtx::RtxMode;
pub use sender::{FrameType, RtpSender, RtpSenderBuilder, VideoTypeHeader};
pub use ssrc::{SsrcAllocator, SsrcDatabase};
