use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use shared::{
    error::{Error, Result},
    marshal::{Marshal, MarshalSize, Unmarshal},
};

pub const VIDEO_ORIENTATION_EXTENSION_SIZE: usize = 1;

/// Coordination of Video Orientation (CVO) in RTP streams, 3GPP TS 26.114.
///
/// 0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |0 0 0 0 C F R R|
/// +-+-+-+-+-+-+-+-+
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct VideoOrientationExtension {
    pub direction: CameraDirection,
    pub flip: bool,
    pub rotation: VideoRotation,
}

#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub enum CameraDirection {
    #[default]
    Front = 0,
    Back = 1,
}

#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub enum VideoRotation {
    #[default]
    Degree0 = 0,
    Degree90 = 1,
    Degree180 = 2,
    Degree270 = 3,
}

impl From<u8> for VideoRotation {
    fn from(value: u8) -> Self {
        match value & 0x3 {
            1 => VideoRotation::Degree90,
            2 => VideoRotation::Degree180,
            3 => VideoRotation::Degree270,
            _ => VideoRotation::Degree0,
        }
    }
}

impl Unmarshal for VideoOrientationExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < VIDEO_ORIENTATION_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }

        let b = raw_packet.get_u8();

        let direction = if (b >> 3) & 0x1 == 1 {
            CameraDirection::Back
        } else {
            CameraDirection::Front
        };
        let flip = (b >> 2) & 0x1 == 1;
        let rotation = VideoRotation::from(b);

        Ok(VideoOrientationExtension {
            direction,
            flip,
            rotation,
        })
    }
}

impl MarshalSize for VideoOrientationExtension {
    fn marshal_size(&self) -> usize {
        VIDEO_ORIENTATION_EXTENSION_SIZE
    }
}

impl Marshal for VideoOrientationExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < VIDEO_ORIENTATION_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }

        let c = (self.direction as u8) << 3;
        let f = (self.flip as u8) << 2;
        let r = self.rotation as u8;

        buf.put_u8(c | f | r);

        Ok(VIDEO_ORIENTATION_EXTENSION_SIZE)
    }
}
