use crate::packet_to_send::{PacketKind, RtpPacketToSend};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// How the history should treat a single packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    /// Not kept at all.
    DontStore,
    /// Kept so the pacer can fetch it once; never resent on NACK.
    DontRetransmit,
    AllowRetransmission,
}

/// Snapshot of a stored packet, taken without touching its state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketState {
    pub sequence_number: u16,
    pub ssrc: u32,
    pub capture_time_ms: i64,
    pub send_time_ms: Option<i64>,
    pub packet_size: usize,
    pub times_retransmitted: u32,
    pub pending_transmission: bool,
    pub storage: StorageType,
    pub kind: PacketKind,
}

/// Sort key of the padding priority set: fewest retransmissions first, then
/// the most recently inserted.
pub(crate) type PriorityKey = (u32, Reverse<u64>);

#[derive(Debug, Clone)]
pub(crate) struct StoredPacket {
    pub(crate) packet: RtpPacketToSend,
    pub(crate) storage: StorageType,
    pub(crate) insert_order: u64,
    pub(crate) times_retransmitted: u32,
    pub(crate) send_time_ms: Option<i64>,
    pub(crate) pending_transmission: bool,
}

impl StoredPacket {
    pub(crate) fn priority_key(&self) -> PriorityKey {
        (self.times_retransmitted, Reverse(self.insert_order))
    }

    /// FEC is only worth repeating when it was stored for retransmission.
    pub(crate) fn padding_eligible(&self) -> bool {
        self.packet.kind() != PacketKind::Fec || self.storage == StorageType::AllowRetransmission
    }

    pub(crate) fn state(&self) -> PacketState {
        PacketState {
            sequence_number: self.packet.sequence_number(),
            ssrc: self.packet.ssrc(),
            capture_time_ms: self.packet.capture_time_ms(),
            send_time_ms: self.send_time_ms,
            packet_size: self.packet.size(),
            times_retransmitted: self.times_retransmitted,
            pending_transmission: self.pending_transmission,
            storage: self.storage,
            kind: self.packet.kind(),
        }
    }
}
