use log::debug;
use serde::{Deserialize, Serialize};
use shared::error::{Error, Result};
use std::collections::HashMap;

/// Largest valid RTP payload type.
pub const MAX_PAYLOAD_TYPE: u8 = 127;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodecType {
    #[default]
    Generic,
    Vp8,
    Vp9,
    H264,
}

impl VideoCodecType {
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("VP8") {
            VideoCodecType::Vp8
        } else if name.eq_ignore_ascii_case("VP9") {
            VideoCodecType::Vp9
        } else if name.eq_ignore_ascii_case("H264") {
            VideoCodecType::H264
        } else {
            VideoCodecType::Generic
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSpecifics {
    Audio {
        frequency: u32,
        channels: u8,
        rate: u32,
    },
    Video {
        codec: VideoCodecType,
        max_rate: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub name: String,
    pub specifics: PayloadSpecifics,
}

impl Payload {
    pub fn is_audio(&self) -> bool {
        matches!(self.specifics, PayloadSpecifics::Audio { .. })
    }

    /// Comfort noise, RFC 3389.
    pub fn is_comfort_noise(&self) -> bool {
        self.is_audio() && self.name.eq_ignore_ascii_case("CN")
    }

    pub fn frequency(&self) -> Option<u32> {
        match self.specifics {
            PayloadSpecifics::Audio { frequency, .. } => Some(frequency),
            PayloadSpecifics::Video { .. } => None,
        }
    }

    pub fn video_codec(&self) -> Option<VideoCodecType> {
        match self.specifics {
            PayloadSpecifics::Video { codec, .. } => Some(codec),
            PayloadSpecifics::Audio { .. } => None,
        }
    }
}

/// Payload types known to one sender.
#[derive(Debug, Clone)]
pub struct PayloadRegistry {
    audio: bool,
    payloads: HashMap<u8, Payload>,
    keep_alive_payload_type: Option<u8>,
}

impl PayloadRegistry {
    pub fn new(audio: bool) -> Self {
        Self {
            audio,
            payloads: HashMap::new(),
            keep_alive_payload_type: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.audio
    }

    /// Registers `payload_type`. Registering the same codec again is allowed:
    /// audio matches on name, frequency and channels and may update an
    /// unset rate, video matches on name.
    pub fn register(
        &mut self,
        name: &str,
        payload_type: u8,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<()> {
        if payload_type > MAX_PAYLOAD_TYPE {
            return Err(Error::ErrInvalidPayloadType(payload_type));
        }
        if self.keep_alive_payload_type == Some(payload_type) {
            return Err(Error::ErrKeepAlivePayloadType(payload_type));
        }

        if let Some(existing) = self.payloads.get_mut(&payload_type) {
            if !existing.name.eq_ignore_ascii_case(name) {
                return Err(Error::ErrPayloadTypeConflict(payload_type));
            }
            return match &mut existing.specifics {
                PayloadSpecifics::Audio {
                    frequency: existing_frequency,
                    channels: existing_channels,
                    rate: existing_rate,
                } => {
                    if *existing_frequency != frequency || *existing_channels != channels {
                        return Err(Error::ErrPayloadTypeConflict(payload_type));
                    }
                    if *existing_rate != rate && *existing_rate != 0 && rate != 0 {
                        return Err(Error::ErrPayloadTypeConflict(payload_type));
                    }
                    if rate != 0 {
                        *existing_rate = rate;
                    }
                    Ok(())
                }
                PayloadSpecifics::Video { .. } => Ok(()),
            };
        }

        let specifics = if self.audio {
            PayloadSpecifics::Audio {
                frequency,
                channels,
                rate,
            }
        } else {
            PayloadSpecifics::Video {
                codec: VideoCodecType::from_name(name),
                max_rate: rate,
            }
        };
        debug!("registered payload type {payload_type} as {name}");
        self.payloads.insert(
            payload_type,
            Payload {
                name: name.to_owned(),
                specifics,
            },
        );
        Ok(())
    }

    pub fn deregister(&mut self, payload_type: u8) -> Result<()> {
        self.payloads
            .remove(&payload_type)
            .map(|_| ())
            .ok_or(Error::ErrPayloadTypeNotFound(payload_type))
    }

    pub fn get(&self, payload_type: u8) -> Option<&Payload> {
        self.payloads.get(&payload_type)
    }

    pub fn contains(&self, payload_type: u8) -> bool {
        self.payloads.contains_key(&payload_type)
    }

    /// Reserves `payload_type` for audio keep-alive packets. It must not be
    /// registered for media.
    pub fn set_keep_alive_payload_type(&mut self, payload_type: u8) -> Result<()> {
        if payload_type > MAX_PAYLOAD_TYPE {
            return Err(Error::ErrInvalidPayloadType(payload_type));
        }
        if self.payloads.contains_key(&payload_type) {
            return Err(Error::ErrKeepAlivePayloadType(payload_type));
        }
        self.keep_alive_payload_type = Some(payload_type);
        Ok(())
    }

    pub fn keep_alive_payload_type(&self) -> Option<u8> {
        self.keep_alive_payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_audio() -> Result<()> {
        let mut registry = PayloadRegistry::new(true);
        registry.register("opus", 111, 48000, 2, 0)?;
        // same codec again, rate filled in
        registry.register("OPUS", 111, 48000, 2, 64000)?;
        assert_eq!(
            registry.get(111).map(|p| p.specifics),
            Some(PayloadSpecifics::Audio {
                frequency: 48000,
                channels: 2,
                rate: 64000
            })
        );

        assert_eq!(
            registry.register("opus", 111, 48000, 2, 32000),
            Err(Error::ErrPayloadTypeConflict(111))
        );
        assert_eq!(
            registry.register("opus", 111, 16000, 2, 0),
            Err(Error::ErrPayloadTypeConflict(111))
        );
        assert_eq!(
            registry.register("PCMU", 111, 8000, 1, 0),
            Err(Error::ErrPayloadTypeConflict(111))
        );
        assert_eq!(
            registry.register("PCMU", 128, 8000, 1, 0),
            Err(Error::ErrInvalidPayloadType(128))
        );
        Ok(())
    }

    #[test]
    fn test_register_video() -> Result<()> {
        let mut registry = PayloadRegistry::new(false);
        registry.register("VP8", 100, 90000, 0, 0)?;
        registry.register("VP8", 100, 90000, 0, 2000)?;
        assert_eq!(
            registry.register("H264", 100, 90000, 0, 0),
            Err(Error::ErrPayloadTypeConflict(100))
        );
        registry.register("I420", 101, 90000, 0, 0)?;
        assert_eq!(registry.get(100).and_then(Payload::video_codec), Some(VideoCodecType::Vp8));
        assert_eq!(registry.get(101).and_then(Payload::video_codec), Some(VideoCodecType::Generic));
        Ok(())
    }

    #[test]
    fn test_deregister() -> Result<()> {
        let mut registry = PayloadRegistry::new(false);
        registry.register("VP8", 100, 90000, 0, 0)?;
        registry.deregister(100)?;
        assert!(!registry.contains(100));
        assert_eq!(registry.deregister(100), Err(Error::ErrPayloadTypeNotFound(100)));
        Ok(())
    }

    #[test]
    fn test_keep_alive_payload_type() -> Result<()> {
        let mut registry = PayloadRegistry::new(true);
        registry.register("CN", 13, 8000, 1, 0)?;
        assert!(registry.get(13).is_some_and(Payload::is_comfort_noise));
        assert_eq!(
            registry.set_keep_alive_payload_type(13),
            Err(Error::ErrKeepAlivePayloadType(13))
        );
        registry.set_keep_alive_payload_type(20)?;
        assert_eq!(registry.keep_alive_payload_type(), Some(20));
        assert_eq!(
            registry.register("PCMU", 20, 8000, 1, 0),
            Err(Error::ErrKeepAlivePayloadType(20))
        );
        Ok(())
    }
}
