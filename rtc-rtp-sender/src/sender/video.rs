use super::{FrameOutput, FrameType, MediaState, OutgoingPacket, PaddingFrame, SendState};
use crate::fec::red::{red_payload, wrap_red};
use crate::fec::{FecProducer, FecProtectionParams};
use crate::history::StorageType;
use crate::observer::PacketPriority;
use crate::packet_to_send::{PacketKind, RtpPacketToSend};
use crate::payload_registry::VideoCodecType;
use bytes::Bytes;
use log::{debug, trace};
use rtp::extension::video_orientation_extension::VideoRotation;
use rtp::extension::{ExtensionType, VideoOrientationExtension};
use rtp::packetizer::{FrameInfo, Fragmentation, GenericPayloader, Payloader};
use shared::error::{Error, Result};
use std::collections::HashMap;

/// Codec-independent facts about a video frame that the encoder knows and
/// the sender needs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VideoTypeHeader {
    /// Sent in the video orientation extension when it is registered.
    pub rotation: Option<VideoRotation>,
    /// Temporal layer of the frame. Frames without one are always stored
    /// for retransmission.
    pub temporal_idx: Option<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct FecConfig {
    pub(super) enabled: bool,
    pub(super) red_payload_type: u8,
    pub(super) fec_payload_type: u8,
    pub(super) producer: FecProducer,
    pub(super) delta_params: FecProtectionParams,
    pub(super) key_params: FecProtectionParams,
}

pub(crate) struct VideoState {
    pub(super) fec: FecConfig,
    pub(super) payloaders: HashMap<VideoCodecType, Box<dyn Payloader>>,
    pub(super) selective_retransmissions: u8,
}

impl VideoState {
    pub(super) fn new(selective_retransmissions: u8) -> Self {
        Self {
            fec: FecConfig::default(),
            payloaders: HashMap::new(),
            selective_retransmissions,
        }
    }

    pub(super) fn set_fec(&mut self, enabled: bool, red_payload_type: u8, fec_payload_type: u8) {
        debug!("fec {enabled}, red pt {red_payload_type}, fec pt {fec_payload_type}");
        if !enabled {
            // drop any half-protected batch
            self.fec.producer = FecProducer::new();
        }
        self.fec.enabled = enabled;
        self.fec.red_payload_type = red_payload_type;
        self.fec.fec_payload_type = fec_payload_type;
    }

    fn storage(&self, video_header: Option<&VideoTypeHeader>) -> StorageType {
        let Some(temporal_idx) = video_header.and_then(|h| h.temporal_idx) else {
            return StorageType::AllowRetransmission;
        };
        let layer_bit = 1u8.checked_shl(temporal_idx as u32).unwrap_or(0);
        if self.selective_retransmissions & layer_bit != 0 {
            StorageType::AllowRetransmission
        } else {
            StorageType::DontRetransmit
        }
    }

    fn payload(
        &mut self,
        codec: VideoCodecType,
        max_data_payload_length: usize,
        frame: &Bytes,
        info: &FrameInfo<'_>,
    ) -> Result<Vec<Bytes>> {
        match self.payloaders.get_mut(&codec) {
            Some(payloader) => payloader.payload(max_data_payload_length, frame, info),
            None => GenericPayloader.payload(max_data_payload_length, frame, info),
        }
    }
}

impl SendState {
    fn video_state_mut(&mut self) -> Result<&mut VideoState> {
        match &mut self.media {
            MediaState::Video(video) => Ok(video),
            MediaState::Audio(_) => Err(Error::ErrVideoOnly),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn build_video_frame(
        &mut self,
        frame_type: FrameType,
        codec: VideoCodecType,
        payload_type: u8,
        timestamp: u32,
        capture_time_ms: i64,
        payload: &Bytes,
        fragmentation: Option<&Fragmentation>,
        video_header: Option<&VideoTypeHeader>,
        paced: bool,
        now_ms: i64,
    ) -> Result<FrameOutput> {
        if frame_type == FrameType::Empty {
            // a pacer asks for padding on its own schedule
            if paced {
                return Ok(FrameOutput::Nothing);
            }
            let bytes = self.bitrate_padding_bytes(now_ms);
            if bytes == 0 {
                return Ok(FrameOutput::Nothing);
            }
            return Ok(FrameOutput::Padding {
                bytes,
                frame: PaddingFrame {
                    payload_type,
                    timestamp,
                    capture_time_ms,
                },
            });
        }

        let key_frame = frame_type == FrameType::VideoKey;
        let max_data_payload_length = self.max_data_payload_length();
        let (payloads, storage, fec) = {
            let video = self.video_state_mut()?;
            let info = FrameInfo {
                key_frame,
                fragmentation,
            };
            let payloads = video.payload(codec, max_data_payload_length, payload, &info)?;
            let storage = video.storage(video_header);
            let fec = if video.fec.enabled {
                let params = if key_frame {
                    video.fec.key_params
                } else {
                    video.fec.delta_params
                };
                video.fec.producer.set_protection_parameters(params);
                Some((video.fec.red_payload_type, video.fec.fec_payload_type))
            } else {
                None
            };
            (payloads, storage, fec)
        };
        if payloads.is_empty() {
            trace!("video frame of {} bytes produced no packets", payload.len());
            return Ok(FrameOutput::Nothing);
        }

        let orientation = self
            .extensions
            .id(ExtensionType::VideoOrientation)
            .map(|id| {
                let rotation = video_header.and_then(|h| h.rotation).unwrap_or_default();
                (
                    id,
                    VideoOrientationExtension {
                        rotation,
                        ..Default::default()
                    },
                )
            });

        let last = payloads.len() - 1;
        let mut packets = Vec::with_capacity(payloads.len() + 1);
        for (i, chunk) in payloads.into_iter().enumerate() {
            let sequence_number = self.sequence.next_sequence_number();
            let header =
                self.build_header(payload_type, i == last, timestamp, sequence_number, self.ssrc)?;
            let mut packet = RtpPacketToSend::new(
                header,
                PacketKind::Video,
                capture_time_ms,
                self.max_payload_length,
            );
            if let Some((id, extension)) = &orientation {
                packet.set_extension(*id, extension)?;
            }
            packet.set_payload(chunk)?;

            let packet = match fec {
                Some((red_payload_type, _)) => {
                    self.video_state_mut()?
                        .fec
                        .producer
                        .add_media_packet(&packet);
                    wrap_red(&packet, red_payload_type)?
                }
                None => packet,
            };
            packets.push(OutgoingPacket {
                packet,
                storage,
                priority: PacketPriority::Low,
            });
        }

        if let Some((red_payload_type, fec_payload_type)) = fec {
            let fec_payloads = self.video_state_mut()?.fec.producer.take_fec_packets();
            let storage = if self.allow_fec_retransmission {
                StorageType::AllowRetransmission
            } else {
                StorageType::DontRetransmit
            };
            for fec_payload in fec_payloads {
                let sequence_number = self.sequence.next_sequence_number();
                let header = self.build_header(
                    red_payload_type,
                    false,
                    timestamp,
                    sequence_number,
                    self.ssrc,
                )?;
                let mut packet = RtpPacketToSend::new(
                    header,
                    PacketKind::Fec,
                    capture_time_ms,
                    self.max_payload_length,
                );
                packet.set_payload(red_payload(fec_payload_type, &fec_payload))?;
                packets.push(OutgoingPacket {
                    packet,
                    storage,
                    priority: PacketPriority::Low,
                });
            }
        }

        if key_frame {
            self.frame_counts.key_frames += 1;
        } else {
            self.frame_counts.delta_frames += 1;
        }
        Ok(FrameOutput::Packets {
            packets,
            frame_counts: Some(self.frame_counts),
        })
    }
}
