use super::{FrameOutput, FrameType, MediaState, OutgoingPacket, SendState};
use crate::fec::red::{red_payload, red_payload_with_redundancy};
use crate::history::StorageType;
use crate::observer::PacketPriority;
use crate::packet_to_send::{PacketKind, RtpPacketToSend};
use bytes::Bytes;
use log::trace;
use rtp::extension::{AudioLevelExtension, ExtensionType};
use rtp::packetizer::Fragmentation;
use shared::error::{Error, Result};

#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct AudioState {
    pub(super) red_payload_type: Option<u8>,
    pub(super) audio_level_dbov: u8,
    last_payload_type: Option<u8>,
    /// Comfort noise was sent since the last speech packet.
    cn_active: bool,
}

impl AudioState {
    /// First packet of a talkspurt gets the marker bit. Switching to a comfort
    /// noise payload type never does.
    fn marker_bit(&mut self, frame_type: FrameType, payload_type: u8, comfort_noise: bool) -> bool {
        let mut marker = false;
        if self.last_payload_type != Some(payload_type) {
            if comfort_noise {
                return false;
            }
            if self.last_payload_type.is_none() {
                if frame_type == FrameType::AudioCn {
                    self.cn_active = true;
                    return false;
                }
                return true;
            }
            marker = true;
        }

        // in-band VAD codecs signal silence through the frame type only
        if frame_type == FrameType::AudioCn {
            self.cn_active = true;
        } else if self.cn_active {
            self.cn_active = false;
            marker = true;
        }
        marker
    }
}

impl SendState {
    fn audio_state_mut(&mut self) -> Result<&mut AudioState> {
        match &mut self.media {
            MediaState::Audio(audio) => Ok(audio),
            MediaState::Video(_) => Err(Error::ErrAudioOnly),
        }
    }

    pub(super) fn build_audio_frame(
        &mut self,
        frame_type: FrameType,
        payload_type: u8,
        timestamp: u32,
        capture_time_ms: i64,
        payload: &Bytes,
        fragmentation: Option<&Fragmentation>,
    ) -> Result<FrameOutput> {
        if frame_type == FrameType::Empty {
            return self.build_keep_alive(timestamp, capture_time_ms);
        }

        let comfort_noise = self
            .payloads
            .get(payload_type)
            .is_some_and(|p| p.is_comfort_noise());
        let audio = self.audio_state_mut()?;
        let marker = audio.marker_bit(frame_type, payload_type, comfort_noise);
        audio.last_payload_type = Some(payload_type);
        let audio = *audio;

        let (header_payload_type, body) = match (audio.red_payload_type, fragmentation) {
            (Some(red_payload_type), Some(fragmentation))
                if fragmentation.len() >= 2 && !marker =>
            {
                (
                    red_payload_type,
                    red_with_redundancy(payload, fragmentation)?,
                )
            }
            (_, Some(fragmentation)) if !fragmentation.is_empty() => (
                payload_type,
                fragmentation
                    .fragment_data(payload, 0)
                    .ok_or(Error::ErrFecMalformedPacket)?,
            ),
            _ => (payload_type, payload.clone()),
        };

        let sequence_number = self.sequence.next_sequence_number();
        let header = self.build_header(
            header_payload_type,
            marker,
            timestamp,
            sequence_number,
            self.ssrc,
        )?;
        let mut packet = RtpPacketToSend::new(
            header,
            PacketKind::Audio,
            capture_time_ms,
            self.max_payload_length,
        );
        if let Some(id) = self.extensions.id(ExtensionType::AudioLevel) {
            packet.set_extension(
                id,
                &AudioLevelExtension {
                    level: audio.audio_level_dbov,
                    voice: frame_type == FrameType::AudioSpeech,
                },
            )?;
        }
        packet.set_payload(body)?;

        Ok(FrameOutput::Packets {
            packets: vec![OutgoingPacket {
                packet,
                storage: StorageType::AllowRetransmission,
                priority: PacketPriority::High,
            }],
            frame_counts: None,
        })
    }

    fn build_keep_alive(&mut self, timestamp: u32, capture_time_ms: i64) -> Result<FrameOutput> {
        let Some(keep_alive_payload_type) = self.payloads.keep_alive_payload_type() else {
            trace!("empty audio frame dropped, no keep-alive payload type");
            return Ok(FrameOutput::Nothing);
        };
        let sequence_number = self.sequence.next_sequence_number();
        let header = self.build_header(
            keep_alive_payload_type,
            false,
            timestamp,
            sequence_number,
            self.ssrc,
        )?;
        let packet = RtpPacketToSend::new(
            header,
            PacketKind::Audio,
            capture_time_ms,
            self.max_payload_length,
        );
        Ok(FrameOutput::Packets {
            packets: vec![OutgoingPacket {
                packet,
                storage: StorageType::DontStore,
                priority: PacketPriority::High,
            }],
            frame_counts: None,
        })
    }
}

/// Fragment 0 is the primary encoding, fragment 1 the redundant one. Falls
/// back to the primary block alone when the redundant one cannot be described.
fn red_with_redundancy(payload: &Bytes, fragmentation: &Fragmentation) -> Result<Bytes> {
    let primary = &fragmentation.fragments[0];
    let redundant = &fragmentation.fragments[1];
    let primary_data = fragmentation
        .fragment_data(payload, 0)
        .ok_or(Error::ErrFecMalformedPacket)?;
    let redundant_data = fragmentation
        .fragment_data(payload, 1)
        .ok_or(Error::ErrFecMalformedPacket)?;

    Ok(red_payload_with_redundancy(
        primary.payload_type,
        &primary_data,
        redundant.payload_type,
        redundant.time_diff,
        &redundant_data,
    )
    .unwrap_or_else(|| {
        trace!("redundant audio block dropped");
        red_payload(primary.payload_type, &primary_data)
    }))
}
