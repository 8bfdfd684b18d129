use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec;

use crate::decode::Decoder;
use crate::encode::encode_to_string;
use crate::error::WireError;
use crate::value::Value;

/// [`tokio_util::codec`] adapter over [`Decoder`] and the encoder.
///
/// Each `decode` call yields at most one complete top-level value, consuming
/// exactly the bytes that formed it; the grammar is self-delimiting, so there
/// is no length framing.
#[derive(Default)]
pub struct WireCodec {
    decoder: Decoder,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl codec::Decoder for WireCodec {
    type Item = Value;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, WireError> {
        let mut decoded = None;
        let mut consumed = src.len();
        for (i, &byte) in src.iter().enumerate() {
            if let Some(value) = self.decoder.push(byte)? {
                decoded = Some(value);
                consumed = i + 1;
                break;
            }
        }
        src.advance(consumed);
        Ok(decoded)
    }
}

impl codec::Encoder<&Value> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, value: &Value, dst: &mut BytesMut) -> Result<(), WireError> {
        dst.put_slice(encode_to_string(value).as_bytes());
        Ok(())
    }
}

impl codec::Encoder<Value> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, value: Value, dst: &mut BytesMut) -> Result<(), WireError> {
        codec::Encoder::encode(self, &value, dst)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio_util::codec::Decoder as _;

    use super::*;

    #[test]
    fn decodes_values_across_chunk_boundaries() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"#12");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(b".5@+");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Value::from(12.5)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Value::Bool(true)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    /// Decode a whole buffer into values.
    fn drain(codec: &mut WireCodec, buf: &mut BytesMut) -> Vec<Value> {
        let mut values = Vec::new();
        while let Some(value) = codec.decode(buf).unwrap() {
            values.push(value);
        }
        values
    }

    #[test]
    fn any_split_point_decodes_identically() {
        // A table with an escaped key, a fractional number, and a trailing
        // scalar: splits land mid-string, mid-escape, mid-number, and
        // exactly on tag bytes.
        let encoded = b"=@a@.b@~#12.5@!+";
        let expected = {
            let mut codec = WireCodec::new();
            let mut buf = BytesMut::from(&encoded[..]);
            drain(&mut codec, &mut buf)
        };
        assert_eq!(expected.len(), 2);
        for split in 0..=encoded.len() {
            let (head, tail) = encoded.split_at(split);
            let mut codec = WireCodec::new();
            let mut buf = BytesMut::from(head);
            let mut values = drain(&mut codec, &mut buf);
            buf.extend_from_slice(tail);
            values.extend(drain(&mut codec, &mut buf));
            assert_eq!(values, expected, "split at {split}");
        }
    }

    #[test]
    fn encode_then_decode() {
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::new();
        let value = Value::from("hello@world");
        tokio_util::codec::Encoder::encode(&mut codec, &value, &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(value));
    }
}
