use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use shared::{
    error::{Error, Result},
    marshal::{Marshal, MarshalSize, Unmarshal},
};

pub const TRANSPORT_CC_EXTENSION_SIZE: usize = 2;

/// TransportCcExtension carries the transport-wide sequence number used by
/// <https://tools.ietf.org/html/draft-holmer-rmcat-transport-wide-cc-extensions-01>
///
/// 0                   1                   2
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  ID   | L=1   |transport-wide sequence number |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct TransportCcExtension {
    pub transport_sequence: u16,
}

impl Unmarshal for TransportCcExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < TRANSPORT_CC_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        let transport_sequence = raw_packet.get_u16();
        Ok(TransportCcExtension { transport_sequence })
    }
}

impl MarshalSize for TransportCcExtension {
    fn marshal_size(&self) -> usize {
        TRANSPORT_CC_EXTENSION_SIZE
    }
}

impl Marshal for TransportCcExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < TRANSPORT_CC_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        buf.put_u16(self.transport_sequence);
        Ok(TRANSPORT_CC_EXTENSION_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_transport_cc_extension() -> Result<()> {
        let raw = Bytes::from_static(&[0x00, 0x02]);
        let t = TransportCcExtension::unmarshal(&mut raw.clone())?;
        assert_eq!(t.transport_sequence, 2);
        assert_eq!(t.marshal()?, raw);

        let short = Bytes::from_static(&[0x00]);
        assert_eq!(
            TransportCcExtension::unmarshal(&mut short.clone()),
            Err(Error::ErrBufferTooSmall)
        );
        Ok(())
    }
}
