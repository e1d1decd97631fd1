use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use shared::{
    error::{Error, Result},
    marshal::{Marshal, MarshalSize, Unmarshal},
};

pub const AUDIO_LEVEL_EXTENSION_SIZE: usize = 1;
/// Loudest representable level, 0 dBov. 127 is silence.
pub const MAX_AUDIO_LEVEL_DBOV: u8 = 127;

/// AudioLevelExtension is the client-to-mixer audio level indication of
/// <https://tools.ietf.org/html/rfc6464>
///
/// One byte format:
/// 0                   1
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  ID   | len=0 |V| level       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct AudioLevelExtension {
    /// -dBov, 0..=127
    pub level: u8,
    /// voice activity
    pub voice: bool,
}

impl Unmarshal for AudioLevelExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < AUDIO_LEVEL_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }

        let b = raw_packet.get_u8();

        Ok(AudioLevelExtension {
            level: b & 0x7F,
            voice: (b & 0x80) != 0,
        })
    }
}

impl MarshalSize for AudioLevelExtension {
    fn marshal_size(&self) -> usize {
        AUDIO_LEVEL_EXTENSION_SIZE
    }
}

impl Marshal for AudioLevelExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < AUDIO_LEVEL_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        if self.level > MAX_AUDIO_LEVEL_DBOV {
            return Err(Error::AudioLevelOverflow);
        }

        let voice = if self.voice { 0x80u8 } else { 0u8 };
        buf.put_u8(voice | self.level);

        Ok(AUDIO_LEVEL_EXTENSION_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_audio_level_extension() -> Result<()> {
        let raw = Bytes::from_static(&[0x88]);
        let a = AudioLevelExtension::unmarshal(&mut raw.clone())?;
        assert_eq!(
            a,
            AudioLevelExtension {
                level: 8,
                voice: true
            }
        );
        assert_eq!(a.marshal()?, raw);

        let silent = AudioLevelExtension {
            level: 127,
            voice: false,
        };
        assert_eq!(&silent.marshal()?[..], &[0x7F]);
        Ok(())
    }

    #[test]
    fn test_audio_level_extension_overflow() {
        let a = AudioLevelExtension {
            level: 128,
            voice: false,
        };
        assert_eq!(a.marshal(), Err(Error::AudioLevelOverflow));
    }
}
