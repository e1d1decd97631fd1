//! Collaborators of the sender: the transport, the pacer and the statistics
//! observers. All are injected as `Arc<dyn ...>` and called synchronously,
//! never while a sender lock is held.

use shared::error::Result;

/// Network side of the sender. Must not block.
pub trait Transport: Send + Sync {
    fn send_rtp(&self, packet: &[u8]) -> Result<()>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketPriority {
    High,
    Normal,
    Low,
}

/// Smooths the outgoing stream. Packets handed over with
/// [`PacedSender::insert_packet`] come back through
/// `RtpSender::time_to_send_packet`.
pub trait PacedSender: Send + Sync {
    fn insert_packet(
        &self,
        priority: PacketPriority,
        ssrc: u32,
        sequence_number: u16,
        capture_time_ms: i64,
        bytes: usize,
        retransmission: bool,
    );
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FrameCounts {
    pub key_frames: u32,
    pub delta_frames: u32,
}

pub trait FrameCountObserver: Send + Sync {
    fn frame_count_updated(&self, frame_counts: FrameCounts, ssrc: u32);
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BitrateStatistics {
    pub bitrate_bps: u32,
    pub packet_rate: u32,
    pub timestamp_ms: i64,
}

pub trait BitrateStatisticsObserver: Send + Sync {
    fn notify(&self, stats: BitrateStatistics, ssrc: u32);
}

pub trait SendSideDelayObserver: Send + Sync {
    fn send_side_delay_updated(&self, avg_delay_ms: i64, max_delay_ms: i64, ssrc: u32);
}

/// Told about every packet that carries a transport-wide sequence number.
pub trait SendPacketObserver: Send + Sync {
    fn on_send_packet(&self, transport_sequence_number: u16, capture_time_ms: i64, ssrc: u32);
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RtpPacketCounter {
    pub packets: u32,
    pub header_bytes: usize,
    pub payload_bytes: usize,
    pub padding_bytes: usize,
}

impl RtpPacketCounter {
    pub fn add(&mut self, header_bytes: usize, payload_bytes: usize, padding_bytes: usize) {
        self.packets += 1;
        self.header_bytes += header_bytes;
        self.payload_bytes += payload_bytes;
        self.padding_bytes += padding_bytes;
    }

    pub fn total_bytes(&self) -> usize {
        self.header_bytes + self.payload_bytes + self.padding_bytes
    }
}

/// Per-stream byte and packet counters since the sender was created.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StreamDataCounters {
    /// Everything that went on the wire, including the subsets below.
    pub transmitted: RtpPacketCounter,
    pub retransmitted: RtpPacketCounter,
    pub fec: RtpPacketCounter,
    pub first_packet_time_ms: Option<i64>,
}
