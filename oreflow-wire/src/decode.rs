use crate::error::DecodeError;
use crate::value::{Key, Table, Value};

/// In-progress scalar payload.
enum Scalar {
    Number(String),
    Text { buf: Vec<u8>, escape: bool },
}

/// In-progress table. `pending_key` is set between consuming a key and its
/// value; a null arriving where a key would go terminates the table.
#[derive(Default)]
struct Frame {
    table: Table,
    pending_key: Option<Key>,
}

/// Push-driven decoder for the tagged text format.
///
/// Feed it bytes with [`push`](Decoder::push); a completed top-level value is
/// returned from the call that consumed its final byte. Any chunking is
/// fine: splits in the middle of a number, a string body, or an escape
/// sequence are resumed transparently.
#[derive(Default)]
pub struct Decoder {
    scalar: Option<Scalar>,
    frames: Vec<Frame>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no value is partially decoded.
    pub fn is_idle(&self) -> bool {
        self.scalar.is_none() && self.frames.is_empty()
    }

    /// Consume one byte. Returns a value if this byte completed one at the
    /// top level.
    ///
    /// After an error the decoder state is unspecified; the session that fed
    /// it is expected to be torn down.
    pub fn push(&mut self, byte: u8) -> Result<Option<Value>, DecodeError> {
        match &mut self.scalar {
            Some(Scalar::Number(buf)) => {
                if byte == b'@' {
                    let text = std::mem::take(buf);
                    self.scalar = None;
                    let number = text
                        .parse::<f64>()
                        .map_err(|_| DecodeError::InvalidNumber(text))?;
                    self.complete(Value::Number(number))
                } else {
                    buf.push(byte as char);
                    Ok(None)
                }
            }
            Some(Scalar::Text { buf, escape }) => {
                if *escape {
                    match byte {
                        b'.' => {
                            buf.push(b'@');
                            *escape = false;
                            Ok(None)
                        }
                        b'~' => {
                            let body = std::mem::take(buf);
                            self.scalar = None;
                            let text = String::from_utf8(body)
                                .map_err(|_| DecodeError::InvalidUtf8)?;
                            self.complete(Value::Text(text))
                        }
                        other => Err(DecodeError::UnknownEscape(other)),
                    }
                } else if byte == b'@' {
                    *escape = true;
                    Ok(None)
                } else {
                    buf.push(byte);
                    Ok(None)
                }
            }
            None => match byte {
                b'!' => self.complete(Value::Null),
                b'#' => {
                    self.scalar = Some(Scalar::Number(String::new()));
                    Ok(None)
                }
                b'@' => {
                    self.scalar = Some(Scalar::Text {
                        buf: Vec::new(),
                        escape: false,
                    });
                    Ok(None)
                }
                b'+' => self.complete(Value::Bool(true)),
                b'-' => self.complete(Value::Bool(false)),
                b'=' => {
                    self.frames.push(Frame::default());
                    Ok(None)
                }
                other => Err(DecodeError::InvalidTag(other)),
            },
        }
    }

    /// Reduce a finished value into the enclosing frame, or out of the
    /// decoder if there is none. Closing a table reduces again with the table
    /// itself, hence the loop.
    fn complete(&mut self, mut value: Value) -> Result<Option<Value>, DecodeError> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Some(value));
            };
            if let Some(key) = frame.pending_key.take() {
                frame.table.insert(key, value);
                return Ok(None);
            }
            if value.is_null() {
                let frame = self.frames.pop().expect("frame checked above");
                value = Value::Table(frame.table);
                continue;
            }
            frame.pending_key = Some(Key::try_from(value)?);
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;
    use crate::encode::encode_to_string;

    /// Decode a whole buffer, asserting nothing is left over.
    fn decode_all(input: &[u8]) -> Result<Vec<Value>, DecodeError> {
        let mut decoder = Decoder::new();
        let mut values = Vec::new();
        for &byte in input {
            if let Some(value) = decoder.push(byte)? {
                values.push(value);
            }
        }
        assert!(decoder.is_idle(), "trailing partial value");
        Ok(values)
    }

    fn decode_one(input: &str) -> Value {
        let mut values = decode_all(input.as_bytes()).unwrap();
        assert_eq!(values.len(), 1);
        values.pop().unwrap()
    }

    #[test]
    fn scalars() {
        assert_eq!(decode_one("!"), Value::Null);
        assert_eq!(decode_one("+"), Value::Bool(true));
        assert_eq!(decode_one("-"), Value::Bool(false));
        assert_eq!(decode_one("#6.5@"), Value::from(6.5));
        assert_eq!(decode_one("@@~"), Value::from(""));
        assert_eq!(decode_one("@a@.b@~"), Value::from("a@b"));
    }

    #[test]
    fn reference_table() {
        let mut expected = Table::new();
        expected.insert("a".into(), Value::from(1.0));
        expected.insert("b".into(), Value::from("x@y"));
        assert_eq!(decode_one("=@a@~#1@@b@~@x@.y@~!"), Value::Table(expected));
    }

    #[test]
    fn key_order_is_irrelevant() {
        assert_eq!(
            decode_one("=@b@~#2@@a@~#1@!"),
            decode_one("=@a@~#1@@b@~#2@!")
        );
    }

    #[test]
    fn nested_tables() {
        let inner = decode_one("=#0@=#0@+!!");
        let Value::Table(outer) = inner else {
            panic!("expected table");
        };
        let Some(Value::Table(nested)) = outer.get(&Key::from(0.0)).cloned() else {
            panic!("expected nested table");
        };
        assert_eq!(nested.get(&Key::from(0.0)), Some(&Value::Bool(true)));
    }

    #[test]
    fn several_values_in_one_chunk() {
        let values = decode_all(b"+#1@@x@~!").unwrap();
        assert_eq!(
            values,
            vec![
                Value::Bool(true),
                Value::from(1.0),
                Value::from("x"),
                Value::Null
            ]
        );
    }

    #[test]
    fn invalid_tag() {
        assert_eq!(decode_all(b"?"), Err(DecodeError::InvalidTag(b'?')));
    }

    #[test]
    fn unknown_escape() {
        assert_eq!(decode_all(b"@a@!"), Err(DecodeError::UnknownEscape(b'!')));
    }

    #[test]
    fn table_key_may_not_be_a_table() {
        assert_eq!(
            decode_all(b"==!#1@!"),
            Err(DecodeError::InvalidTableKey("table"))
        );
    }

    #[test]
    fn byte_at_a_time_resumes_mid_number_string_and_escape() {
        // One feed covering every partial-state resumption: a key with an
        // escape in it, a fractional number, and nested values.
        let mut decoder = Decoder::new();
        let mut out = None;
        for &b in "=@a@.b@~#12.5@!".as_bytes() {
            if let Some(v) = decoder.push(b).unwrap() {
                out = Some(v);
            }
        }
        let mut expected = Table::new();
        expected.insert("a@b".into(), Value::from(12.5));
        assert_eq!(out, Some(Value::Table(expected)));
        assert!(decoder.is_idle());
    }

    fn any_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            // Finite numbers only: NaN breaks equality, infinities don't
            // survive the textual form.
            (-1e15f64..1e15).prop_map(Value::Number),
            any::<String>().prop_map(Value::Text),
            any::<bool>().prop_map(Value::Bool),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            let key = prop_oneof![
                (-100f64..100.0).prop_map(Key::Number),
                "[a-zA-Z@~.#=!+-]{0,8}".prop_map(Key::Text),
                any::<bool>().prop_map(Key::Bool),
            ];
            proptest::collection::btree_map(key, inner, 0..6).prop_map(Value::Table)
        })
    }

    #[proptest]
    fn round_trip(#[strategy(any_value())] value: Value) {
        let encoded = encode_to_string(&value);
        prop_assert_eq!(decode_one(&encoded), value);
    }

}
