//! Length-prefixed protobuf framing for `CastMessage`.

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use crate::{
    cast::cast_channel::{self, cast_message::{PayloadType, ProtocolVersion}},
    error::{Error, Result},
    message::{CastMessage, CastMessagePayload},
};
use protobuf::Message;
use tokio_util::codec;

const SIZE_OF_U32: usize = 4;

/// Receivers reject messages larger than this.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Each frame is a big endian `u32` length followed by that many bytes of
/// serialised `extensions.api.cast_channel.CastMessage`.
#[derive(Debug, Default)]
pub struct CastMessageCodec;

impl codec::Encoder<CastMessage> for CastMessageCodec {
    type Error = Error;

    fn encode(
        &mut self,
        msg: CastMessage,
        dst: &mut BytesMut
    ) -> Result<()>
    {
        let mut proto_msg = cast_channel::CastMessage::new();

        proto_msg.set_protocol_version(ProtocolVersion::CASTV2_1_0);

        proto_msg.set_namespace(msg.namespace);
        proto_msg.set_source_id(msg.source);
        proto_msg.set_destination_id(msg.destination);

        match msg.payload {
            CastMessagePayload::String(s) => {
                proto_msg.set_payload_type(PayloadType::STRING);
                proto_msg.set_payload_utf8(s);
            },

            CastMessagePayload::Binary(b) => {
                proto_msg.set_payload_type(PayloadType::BINARY);
                proto_msg.set_payload_binary(b);
            },
        };

        let proto_bytes = proto_msg.write_to_bytes()?;
        let proto_len = proto_bytes.len();

        if proto_len > MAX_MESSAGE_LEN {
            bail!("CastMessageCodec::encode: message too large\n\
                   _ len = {proto_len}\n\
                   _ max = {MAX_MESSAGE_LEN}");
        }

        let proto_len_u32: u32 = proto_len.try_into()?;

        // Frames already buffered but not yet flushed stay in `dst`.
        dst.reserve(proto_len + SIZE_OF_U32);

        // Uses big endian
        dst.put_u32(proto_len_u32);
        dst.put_slice(&proto_bytes);

        Ok(())
    }
}

impl codec::Decoder for CastMessageCodec {
    type Item = CastMessage;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut
    ) -> Result<Option<CastMessage>>
    {
        if src.len() < SIZE_OF_U32 {
            return Ok(None);
        }

        let proto_len_bytes = <[u8; SIZE_OF_U32]>::try_from(&src[0..SIZE_OF_U32])?;
        let proto_len_u32: u32 = u32::from_be_bytes(proto_len_bytes);
        let proto_len = usize::try_from(proto_len_u32)?;

        if proto_len > MAX_MESSAGE_LEN {
            bail!("CastMessageCodec::decode: frame length too large\n\
                   _ len = {proto_len}\n\
                   _ max = {MAX_MESSAGE_LEN}");
        }

        let total_len: usize = proto_len + SIZE_OF_U32;

        let src_len = src.len();

        if src_len < total_len {
            src.reserve(total_len - src_len);
            return Ok(None);
        }

        let mut proto_msg = cast_channel::CastMessage::parse_from_bytes(
            &src[SIZE_OF_U32..total_len])?;

        src.advance(total_len);

        let msg = CastMessage {
            namespace: proto_msg.take_namespace(),
            source: proto_msg.take_source_id(),
            destination: proto_msg.take_destination_id(),
            payload: match proto_msg.payload_type() {
                PayloadType::STRING =>
                    CastMessagePayload::String(proto_msg.take_payload_utf8()),
                PayloadType::BINARY =>
                    CastMessagePayload::Binary(proto_msg.take_payload_binary()),
            },
        };

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio_util::codec::{Decoder, Encoder};

    fn ping(source: &str) -> CastMessage {
        CastMessage {
            namespace: "urn:x-cast:com.google.cast.tp.heartbeat".to_string(),
            source: source.to_string(),
            destination: "receiver-0".to_string(),
            payload: r#"{"type":"PING"}"#.to_string().into(),
        }
    }

    #[test]
    fn buffered_frames_are_kept() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();

        codec.encode(ping("sender-0"), &mut buf).unwrap();
        codec.encode(ping("sender-1"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ping("sender-0")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ping("sender-1")));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = CastMessageCodec;
        let mut full = BytesMut::new();
        codec.encode(ping("sender-0"), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&full[full.len() - 3..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(ping("sender-0")));
    }

    #[test]
    fn binary_payload() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();
        let msg = CastMessage {
            payload: vec![0_u8, 1, 2, 0xff].into(),
            ..ping("sender-0")
        };

        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let mut codec = CastMessageCodec;
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);

        assert!(codec.decode(&mut buf).is_err());
    }
}
