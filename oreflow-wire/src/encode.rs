use std::fmt::Write;

use crate::value::{Key, Value};

/// Append the encoding of `value` to `out`.
///
/// Tables encode their entries in key order, so encoding is canonical.
pub fn encode(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('!'),
        Value::Number(x) => {
            // f64 Display is the shortest representation that parses back
            // exactly; integral values print with no fractional part.
            let _ = write!(out, "#{x}@");
        }
        Value::Text(x) => {
            out.push('@');
            for c in x.chars() {
                if c == '@' {
                    out.push_str("@.");
                } else {
                    out.push(c);
                }
            }
            out.push_str("@~");
        }
        Value::Bool(true) => out.push('+'),
        Value::Bool(false) => out.push('-'),
        Value::Table(table) => {
            out.push('=');
            for (key, value) in table {
                encode_key(key, out);
                encode(value, out);
            }
            out.push('!');
        }
    }
}

fn encode_key(key: &Key, out: &mut String) {
    // Cheaper than cloning the key into a Value.
    match key {
        Key::Number(x) => {
            let _ = write!(out, "#{x}@");
        }
        Key::Text(x) => encode(&Value::Text(x.clone()), out),
        Key::Bool(x) => encode(&Value::Bool(*x), out),
    }
}

/// Encode a single value into a fresh string.
pub fn encode_to_string(value: &Value) -> String {
    let mut out = String::new();
    encode(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::Table;

    #[test]
    fn scalars() {
        assert_eq!(encode_to_string(&Value::Null), "!");
        assert_eq!(encode_to_string(&Value::Bool(true)), "+");
        assert_eq!(encode_to_string(&Value::Bool(false)), "-");
        assert_eq!(encode_to_string(&Value::from(3.0)), "#3@");
        assert_eq!(encode_to_string(&Value::from(-0.25)), "#-0.25@");
        assert_eq!(encode_to_string(&Value::from("")), "@@~");
        assert_eq!(encode_to_string(&Value::from("a@b")), "@a@.b@~");
    }

    #[test]
    fn table_matches_reference_encoding() {
        let mut table = Table::new();
        table.insert("a".into(), Value::from(1.0));
        table.insert("b".into(), Value::from("x@y"));
        assert_eq!(
            encode_to_string(&Value::Table(table)),
            "=@a@~#1@@b@~@x@.y@~!"
        );
    }

    #[test]
    fn integral_floats_have_no_fraction() {
        assert_eq!(encode_to_string(&Value::from(64.0)), "#64@");
        assert_eq!(encode_to_string(&Value::from(1e300)), "#1e300@");
    }
}
