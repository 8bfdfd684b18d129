use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::error::DecodeError;

/// A table: an ordered map from scalar keys to values.
///
/// Key order on the wire is irrelevant to equality; the map form makes
/// encoding canonical.
pub type Table = BTreeMap<Key, Value>;

/// A decoded wire value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
    Table(Table),
}

/// A table key. Only scalars may key a table.
///
/// Numbers compare bitwise (via [`f64::total_cmp`]), which keeps `Eq`, `Ord`
/// and `Hash` mutually consistent.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Text(_) => 1,
            Key::Bool(_) => 2,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Number(x), Key::Number(y)) => x.to_bits() == y.to_bits(),
            (Key::Text(x), Key::Text(y)) => x == y,
            (Key::Bool(x), Key::Bool(y)) => x == y,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Key::Number(x), Key::Number(y)) => x.total_cmp(y),
            (Key::Text(x), Key::Text(y)) => x.cmp(y),
            (Key::Bool(x), Key::Bool(y)) => x.cmp(y),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Key::Number(x) => x.to_bits().hash(state),
            Key::Text(x) => x.hash(state),
            Key::Bool(x) => x.hash(state),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(x), Value::Number(y)) => x.to_bits() == y.to_bits(),
            (Value::Text(x), Value::Text(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Table(x), Value::Table(y)) => x == y,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Number(x) => {
                1u8.hash(state);
                x.to_bits().hash(state);
            }
            Value::Text(x) => {
                2u8.hash(state);
                x.hash(state);
            }
            Value::Bool(x) => {
                3u8.hash(state);
                x.hash(state);
            }
            Value::Table(x) => {
                4u8.hash(state);
                x.hash(state);
            }
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of this value's variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Bool(_) => "bool",
            Value::Table(_) => "table",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(x) => Some(x),
            _ => None,
        }
    }

    pub fn into_table(self) -> Option<Table> {
        match self {
            Value::Table(x) => Some(x),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(x) => Some(x),
            _ => None,
        }
    }
}

impl TryFrom<Value> for Key {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Number(x) => Ok(Key::Number(x)),
            Value::Text(x) => Ok(Key::Text(x)),
            Value::Bool(x) => Ok(Key::Bool(x)),
            other => Err(DecodeError::InvalidTableKey(other.kind())),
        }
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Number(x) => Value::Number(x),
            Key::Text(x) => Value::Text(x),
            Key::Bool(x) => Value::Bool(x),
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(x: $ty) -> Self {
                    Value::Number(x as f64)
                }
            }

            impl From<$ty> for Key {
                fn from(x: $ty) -> Self {
                    Key::Number(x as f64)
                }
            }
        )+
    };
}

impl_from_number!(i32, u32, usize);

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(x)
    }
}

impl From<f64> for Key {
    fn from(x: f64) -> Self {
        Key::Number(x)
    }
}

impl From<&str> for Value {
    fn from(x: &str) -> Self {
        Value::Text(x.to_owned())
    }
}

impl From<String> for Value {
    fn from(x: String) -> Self {
        Value::Text(x)
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Self {
        Value::Bool(x)
    }
}

impl From<Table> for Value {
    fn from(x: Table) -> Self {
        Value::Table(x)
    }
}

impl From<bool> for Key {
    fn from(x: bool) -> Self {
        Key::Bool(x)
    }
}

impl From<&str> for Key {
    fn from(x: &str) -> Self {
        Key::Text(x.to_owned())
    }
}

impl From<String> for Key {
    fn from(x: String) -> Self {
        Key::Text(x)
    }
}

/// Encode an array as a table with keys `0.0..n-1.0`, omitting null elements.
pub fn array_to_table(values: Vec<Value>) -> Table {
    values
        .into_iter()
        .enumerate()
        .filter(|(_, value)| !value.is_null())
        .map(|(i, value)| (Key::from(i), value))
        .collect()
}

/// Recover an array from an integer-keyed table, filling gaps with nulls.
///
/// Non-number and non-integer keys are decode errors.
pub fn table_to_array(table: Table) -> Result<Vec<Value>, DecodeError> {
    let mut result = Vec::new();
    for (key, value) in table {
        let index = match key {
            Key::Number(x) => x,
            other => {
                return Err(DecodeError::NonNumberArrayKey(match other {
                    Key::Text(_) => "string",
                    _ => "bool",
                }))
            }
        };
        if index.fract() != 0.0 || index < 0.0 || index > usize::MAX as f64 {
            return Err(DecodeError::NonIntegerArrayKey(index));
        }
        let index = index as usize;
        if result.len() <= index {
            result.resize_with(index + 1, || Value::Null);
        }
        result[index] = value;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn array_round_trip_with_gaps() {
        let array = vec![
            Value::from(1.0),
            Value::Null,
            Value::from("x"),
            Value::Null,
            Value::from(true),
        ];
        let table = array_to_table(array.clone());
        assert_eq!(table.len(), 3);
        assert_eq!(table_to_array(table).unwrap(), array);
    }

    #[test]
    fn trailing_nulls_are_dropped() {
        let table = array_to_table(vec![Value::from(1.0), Value::Null]);
        assert_eq!(table_to_array(table).unwrap(), vec![Value::from(1.0)]);
    }

    #[test]
    fn non_integer_array_key_is_an_error() {
        let mut table = Table::new();
        table.insert(Key::Number(0.5), Value::Null);
        assert_eq!(
            table_to_array(table),
            Err(DecodeError::NonIntegerArrayKey(0.5))
        );
    }

    #[test]
    fn string_array_key_is_an_error() {
        let mut table = Table::new();
        table.insert(Key::from("x"), Value::from(1.0));
        assert!(matches!(
            table_to_array(table),
            Err(DecodeError::NonNumberArrayKey("string"))
        ));
    }

    #[test]
    fn key_ordering_is_number_text_bool() {
        let mut keys = [Key::from(true), Key::from("a"), Key::from(2.0), Key::from(1.0)];
        keys.sort();
        assert_eq!(
            keys,
            [Key::from(1.0), Key::from(2.0), Key::from("a"), Key::from(true)]
        );
    }

    mod key_laws {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        use proptest::prelude::*;
        use test_strategy::proptest;

        use super::super::*;

        fn any_key() -> impl Strategy<Value = Key> {
            prop_oneof![
                any::<f64>().prop_map(Key::Number),
                any::<String>().prop_map(Key::Text),
                any::<bool>().prop_map(Key::Bool),
            ]
        }

        fn hash_of(key: &Key) -> u64 {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            hasher.finish()
        }

        #[proptest]
        fn eq_reflexive(#[strategy(any_key())] x: Key) {
            assert!(x == x);
        }

        #[proptest]
        fn ord_matches_eq(#[strategy(any_key())] x: Key, #[strategy(any_key())] y: Key) {
            assert_eq!(x == y, x.cmp(&y).is_eq());
        }

        #[proptest]
        fn hash_matches_eq(#[strategy(any_key())] x: Key, #[strategy(any_key())] y: Key) {
            if x == y {
                assert_eq!(hash_of(&x), hash_of(&y));
            }
        }
    }
}
