use crate::history::StorageMode;
use crate::rtx::RtxMode;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 1460;
pub const MIN_MAX_PAYLOAD_LENGTH: usize = 100;
/// Largest packet the sender will build.
pub const IP_PACKET_SIZE: usize = 1500;

/// Temporal layers whose packets may be retransmitted, one bit per layer.
pub const RETRANSMIT_BASE_LAYER: u8 = 0x1;
pub const RETRANSMIT_HIGHER_LAYERS: u8 = 0x6;
pub const RETRANSMIT_ALL_LAYERS: u8 = RETRANSMIT_BASE_LAYER | RETRANSMIT_HIGHER_LAYERS;

/// Static settings of an `RtpSender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpSenderConfig {
    /// Audio or video sender.
    pub audio: bool,
    pub max_payload_length: usize,
    pub storage_mode: StorageMode,
    pub storage_capacity: usize,
    pub selective_retransmissions: u8,
    /// Store FEC packets so they can be resent on NACK.
    pub allow_fec_retransmission: bool,
    pub rtx_mode: RtxMode,
    pub target_bitrate_kbps: u32,
}

impl Default for RtpSenderConfig {
    fn default() -> Self {
        Self {
            audio: false,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            storage_mode: StorageMode::Disabled,
            storage_capacity: 0,
            selective_retransmissions: RETRANSMIT_ALL_LAYERS,
            allow_fec_retransmission: false,
            rtx_mode: RtxMode::Off,
            target_bitrate_kbps: 0,
        }
    }
}
