use crate::error::{ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

/// Datagram codec used with `UdpFramed`.
///
/// Each datagram arrives as one complete buffer, so decoding hands the whole
/// buffer over as a single packet without copying. Oversized datagrams are
/// discarded before they reach the protocol manager.
#[derive(Debug, Clone, Copy)]
pub struct DatagramCodec {
    max_packet_size: usize,
}

impl DatagramCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Decoder for DatagramCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }

        if src.len() > self.max_packet_size {
            let len = src.len();
            // Leave nothing behind, otherwise the framed reader decodes the same datagram again
            src.clear();
            warn!(len, max = self.max_packet_size, "Dropping oversized datagram");
            return Err(ProtocolError::OversizedPacket(len));
        }

        Ok(Some(src.split().freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_takes_whole_datagram() {
        let mut codec = DatagramCodec::new(16);
        let mut buf = BytesMut::from(&[7u8, 4, 0, 0, 0, 1][..]);

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&packet[..], &[7, 4, 0, 0, 0, 1]);
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_datagram_is_discarded() {
        let mut codec = DatagramCodec::new(4);
        let mut buf = BytesMut::from(&[0u8; 5][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(5))
        ));
        assert!(buf.is_empty());
    }
}
