//! Packet history for retransmission and payload padding.
//!
//! Packets live in an arena. `by_seq` maps each RTP sequence number to its
//! arena slot and `padding_priority` orders the slots by usefulness for
//! padding. Both hold plain `u32` indices, which stay valid until the packet
//! is removed.

mod stored_packet;

pub use stored_packet::{PacketState, StorageType};

use crate::packet_to_send::RtpPacketToSend;
use log::{debug, trace, warn};
use rtp::sequence::is_older_sequence_number;
use serde::{Deserialize, Serialize};
use shared::time::Clock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use stored_packet::{PriorityKey, StoredPacket};

/// Hard limit on stored packets, whatever the configured capacity.
pub const MAX_CAPACITY: usize = 9600;
/// Packets are kept at least this long after their last send.
pub const MIN_PACKET_DURATION_MS: i64 = 1000;
/// ... or this many round trips, whichever is longer.
pub const MIN_PACKET_DURATION_RTT: i64 = 3;
/// With `StoreAndCull`, packets older than this many retention periods go.
pub const PACKET_CULLING_DELAY_FACTOR: i64 = 3;
/// Smallest request served by [`PacketHistory::get_best_fitting`].
pub const MIN_PACKET_REQUEST_BYTES: usize = 50;
/// Lower bound of the interval between two resends of one packet.
pub const MIN_RESEND_INTERVAL_MS: i64 = 5;

/// Retention policy of the whole history.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMode {
    #[default]
    Disabled,
    /// Keep up to the configured number of packets.
    Store,
    /// As `Store`, and also drop packets that have clearly aged out or that
    /// the remote end acknowledged.
    StoreAndCull,
}

/// Store of recently sent packets, keyed by sequence number.
pub struct PacketHistory {
    clock: Arc<dyn Clock>,
    mode: StorageMode,
    number_to_store: usize,
    rtt_ms: Option<i64>,

    arena: Vec<Option<StoredPacket>>,
    free_slots: Vec<u32>,
    by_seq: BTreeMap<u16, u32>,
    padding_priority: BTreeMap<PriorityKey, u32>,
    earliest_seqno: Option<u16>,
    next_insert_order: u64,
}

impl PacketHistory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            mode: StorageMode::Disabled,
            number_to_store: 0,
            rtt_ms: None,
            arena: vec![],
            free_slots: vec![],
            by_seq: BTreeMap::new(),
            padding_priority: BTreeMap::new(),
            earliest_seqno: None,
            next_insert_order: 0,
        }
    }

    /// Switches the retention policy. All stored packets are dropped, even
    /// when `mode` equals the current mode.
    pub fn set_storage_mode(&mut self, mode: StorageMode, number_to_store: usize) {
        if number_to_store > MAX_CAPACITY {
            warn!("packet history capacity {number_to_store} capped at {MAX_CAPACITY}");
        }
        self.reset();
        self.mode = mode;
        self.number_to_store = match mode {
            StorageMode::Disabled => 0,
            _ => number_to_store.min(MAX_CAPACITY),
        };
        debug!(
            "packet history mode {:?}, capacity {}",
            self.mode, self.number_to_store
        );
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.number_to_store
    }

    pub fn set_rtt(&mut self, rtt_ms: i64) {
        self.rtt_ms = Some(rtt_ms.max(0));
        if self.mode == StorageMode::StoreAndCull {
            let now_ms = self.clock.time_in_milliseconds();
            self.cull_old_packets(now_ms);
        }
    }

    pub fn len(&self) -> usize {
        self.by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_seq.is_empty()
    }

    pub fn contains(&self, sequence_number: u16) -> bool {
        self.by_seq.contains_key(&sequence_number)
    }

    /// Stores `packet`. With `send_time_ms` the packet has already been put on
    /// the wire; without it the packet waits in the pacer.
    pub fn put(
        &mut self,
        packet: RtpPacketToSend,
        storage: StorageType,
        send_time_ms: Option<i64>,
    ) {
        if self.mode == StorageMode::Disabled
            || storage == StorageType::DontStore
            || self.number_to_store == 0
        {
            return;
        }

        let now_ms = self.clock.time_in_milliseconds();
        self.cull_old_packets(now_ms);

        let sequence_number = packet.sequence_number();
        if self.by_seq.contains_key(&sequence_number) {
            warn!("sequence number {sequence_number} already in packet history, replacing");
            self.remove(sequence_number);
        }

        while self.by_seq.len() >= self.number_to_store {
            let Some(oldest) = self.earliest_seqno else {
                break;
            };
            self.remove(oldest);
        }

        let stored = StoredPacket {
            packet,
            storage,
            insert_order: self.next_insert_order,
            times_retransmitted: 0,
            send_time_ms,
            pending_transmission: send_time_ms.is_none(),
        };
        self.next_insert_order += 1;

        let key = stored.priority_key();
        let eligible = stored.padding_eligible();
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.arena[index as usize] = Some(stored);
                index
            }
            None => {
                self.arena.push(Some(stored));
                (self.arena.len() - 1) as u32
            }
        };

        self.by_seq.insert(sequence_number, index);
        if eligible {
            self.padding_priority.insert(key, index);
        }
        match self.earliest_seqno {
            Some(earliest) if !is_older_sequence_number(sequence_number, earliest) => {}
            _ => self.earliest_seqno = Some(sequence_number),
        }
    }

    /// Read-only view of a stored packet.
    pub fn get_state(&self, sequence_number: u16) -> Option<PacketState> {
        self.stored(sequence_number).map(StoredPacket::state)
    }

    /// Pacer path: hands out the packet for transmission and records the send.
    ///
    /// The first fetch of a queued packet always succeeds. Fetching a packet
    /// that already went out counts as a retransmission and is refused for
    /// packets that may not be retransmitted or when the previous resend was
    /// too recent. FEC kept only for its first transmission is reduced to its
    /// header afterwards.
    pub fn get_and_set_send_time(&mut self, sequence_number: u16) -> Option<RtpPacketToSend> {
        if self.mode == StorageMode::Disabled {
            return None;
        }
        let index = *self.by_seq.get(&sequence_number)?;
        let now_ms = self.clock.time_in_milliseconds();

        let stored = self.arena[index as usize].as_ref()?;
        if stored.send_time_ms.is_some() {
            if stored.storage != StorageType::AllowRetransmission {
                trace!("packet {sequence_number} may not be retransmitted");
                return None;
            }
            if self.too_soon(stored, now_ms) {
                trace!("packet {sequence_number} resent too recently");
                return None;
            }
        }

        self.mark_sent(index, now_ms);

        let stored = self.arena[index as usize].as_mut()?;
        let packet = stored.packet.clone();
        if stored.storage == StorageType::DontRetransmit && !stored.padding_eligible() {
            stored.packet.strip_payload();
        }
        Some(packet)
    }

    /// Direct resend path for NACKs when no pacer is in use.
    pub fn get_for_resend(&mut self, sequence_number: u16) -> Option<RtpPacketToSend> {
        let index = self.resendable_index(sequence_number)?;
        let now_ms = self.clock.time_in_milliseconds();
        self.mark_sent(index, now_ms);
        self.arena[index as usize]
            .as_ref()
            .map(|stored| stored.packet.clone())
    }

    /// Paced resend path: checks the packet may be resent now and flags it
    /// as pending until the pacer fetches it.
    pub fn mark_for_paced_resend(&mut self, sequence_number: u16) -> Option<PacketState> {
        let index = self.resendable_index(sequence_number)?;
        let stored = self.arena[index as usize].as_mut()?;
        stored.pending_transmission = true;
        Some(stored.state())
    }

    /// Flags a packet as queued in the pacer. Returns false if it is unknown.
    pub fn set_pending_transmission(&mut self, sequence_number: u16) -> bool {
        let Some(index) = self.by_seq.get(&sequence_number).copied() else {
            return false;
        };
        match self.arena[index as usize].as_mut() {
            Some(stored) => {
                stored.pending_transmission = true;
                true
            }
            None => false,
        }
    }

    /// The sent packet whose size is closest to `packet_size`, newest first
    /// on ties. Does not change any packet state.
    pub fn get_best_fitting(&self, packet_size: usize) -> Option<RtpPacketToSend> {
        if self.mode == StorageMode::Disabled || packet_size < MIN_PACKET_REQUEST_BYTES {
            return None;
        }

        self.by_seq
            .values()
            .filter_map(|index| self.arena[*index as usize].as_ref())
            .filter(|stored| {
                stored.padding_eligible()
                    && stored.send_time_ms.is_some()
                    && !stored.pending_transmission
            })
            .min_by_key(|stored| {
                (
                    stored.packet.size().abs_diff(packet_size),
                    std::cmp::Reverse(stored.insert_order),
                )
            })
            .map(|stored| stored.packet.clone())
    }

    /// Takes the most useful packet for payload padding and records it as
    /// sent again.
    pub fn get_padding_candidate(&mut self) -> Option<RtpPacketToSend> {
        self.padding_candidate_within(usize::MAX)
    }

    /// As [`Self::get_padding_candidate`], but only if the top candidate is
    /// no larger than `max_size`; nothing changes otherwise.
    pub fn padding_candidate_within(&mut self, max_size: usize) -> Option<RtpPacketToSend> {
        if self.mode == StorageMode::Disabled {
            return None;
        }
        let index = *self.padding_priority.values().next()?;
        let stored = self.arena[index as usize].as_ref()?;
        if stored.pending_transmission || stored.send_time_ms.is_none() {
            return None;
        }
        if stored.packet.size() > max_size {
            return None;
        }

        let now_ms = self.clock.time_in_milliseconds();
        self.mark_sent(index, now_ms);
        self.arena[index as usize]
            .as_ref()
            .map(|stored| stored.packet.clone())
    }

    /// Drops packets the remote end has acknowledged.
    pub fn ack_cull(&mut self, acked_sequence_numbers: &[u16]) {
        if self.mode != StorageMode::StoreAndCull {
            return;
        }
        for sequence_number in acked_sequence_numbers {
            self.remove(*sequence_number);
        }
    }

    fn reset(&mut self) {
        self.arena.clear();
        self.free_slots.clear();
        self.by_seq.clear();
        self.padding_priority.clear();
        self.earliest_seqno = None;
    }

    fn stored(&self, sequence_number: u16) -> Option<&StoredPacket> {
        let index = self.by_seq.get(&sequence_number)?;
        self.arena[*index as usize].as_ref()
    }

    fn packet_duration_ms(&self) -> i64 {
        match self.rtt_ms {
            Some(rtt_ms) => MIN_PACKET_DURATION_MS.max(MIN_PACKET_DURATION_RTT * rtt_ms),
            None => MIN_PACKET_DURATION_MS,
        }
    }

    fn min_resend_interval_ms(&self) -> i64 {
        MIN_RESEND_INTERVAL_MS.max(self.rtt_ms.unwrap_or(0))
    }

    /// The original transmission can be followed by a resend right away;
    /// consecutive resends must be spaced by the minimum resend interval.
    fn too_soon(&self, stored: &StoredPacket, now_ms: i64) -> bool {
        match stored.send_time_ms {
            Some(send_time_ms) => {
                stored.times_retransmitted > 0
                    && now_ms < send_time_ms + self.min_resend_interval_ms()
            }
            None => false,
        }
    }

    fn resendable_index(&self, sequence_number: u16) -> Option<u32> {
        if self.mode == StorageMode::Disabled {
            return None;
        }
        let index = *self.by_seq.get(&sequence_number)?;
        let stored = self.arena[index as usize].as_ref()?;
        if stored.storage != StorageType::AllowRetransmission {
            trace!("packet {sequence_number} may not be retransmitted");
            return None;
        }
        if stored.pending_transmission || stored.send_time_ms.is_none() {
            trace!("packet {sequence_number} is still queued for transmission");
            return None;
        }
        let now_ms = self.clock.time_in_milliseconds();
        if self.too_soon(stored, now_ms) {
            trace!("packet {sequence_number} resent too recently");
            return None;
        }
        Some(index)
    }

    fn mark_sent(&mut self, index: u32, now_ms: i64) {
        let Some(stored) = self.arena[index as usize].as_mut() else {
            return;
        };
        let eligible = stored.padding_eligible();
        if eligible {
            self.padding_priority.remove(&stored.priority_key());
        }
        if stored.send_time_ms.is_some() {
            stored.times_retransmitted += 1;
        }
        stored.send_time_ms = Some(now_ms);
        stored.pending_transmission = false;
        if eligible {
            self.padding_priority.insert(stored.priority_key(), index);
        }
    }

    fn remove(&mut self, sequence_number: u16) -> Option<StoredPacket> {
        let index = self.by_seq.remove(&sequence_number)?;
        let stored = self.arena[index as usize].take()?;
        self.free_slots.push(index);
        self.padding_priority.remove(&stored.priority_key());

        if self.earliest_seqno == Some(sequence_number) {
            self.earliest_seqno = self
                .by_seq
                .range((Bound::Excluded(sequence_number), Bound::Unbounded))
                .next()
                .or_else(|| self.by_seq.iter().next())
                .map(|(seq, _)| *seq);
        }
        Some(stored)
    }

    /// Evicts from the oldest end while at the absolute cap. With
    /// `StoreAndCull`, also drops every packet last sent more than the
    /// culling delay ago, wherever it sits. Pending packets are never culled.
    fn cull_old_packets(&mut self, now_ms: i64) {
        while self.by_seq.len() >= MAX_CAPACITY {
            let Some(oldest) = self.earliest_seqno else {
                break;
            };
            self.remove(oldest);
        }

        if self.mode != StorageMode::StoreAndCull {
            return;
        }
        let max_age_ms = self.packet_duration_ms() * PACKET_CULLING_DELAY_FACTOR;
        let expired: Vec<u16> = self
            .by_seq
            .iter()
            .filter_map(|(sequence_number, index)| {
                let stored = self.arena[*index as usize].as_ref()?;
                if stored.pending_transmission {
                    return None;
                }
                let send_time_ms = stored.send_time_ms?;
                (send_time_ms + max_age_ms <= now_ms).then_some(*sequence_number)
            })
            .collect();
        if !expired.is_empty() {
            trace!("culling {} expired packets", expired.len());
        }
        for sequence_number in expired {
            self.remove(sequence_number);
        }
    }
}
