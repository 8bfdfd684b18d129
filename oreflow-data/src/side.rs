use oreflow_wire::Value;
use strum::{Display, FromRepr};

/// A face of a block, as agents number them.
#[derive(Debug, Display, FromRepr, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Bottom = 0,
    Top = 1,
    Back = 2,
    Front = 3,
    Right = 4,
    Left = 5,
}

/// Cardinal and axis aliases for the same six faces.
impl Side {
    pub const DOWN: Side = Side::Bottom;
    pub const UP: Side = Side::Top;
    pub const NORTH: Side = Side::Back;
    pub const SOUTH: Side = Side::Front;
    pub const WEST: Side = Side::Right;
    pub const EAST: Side = Side::Left;
}

impl From<Side> for Value {
    fn from(side: Side) -> Self {
        Value::Number(side as u8 as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_numbering() {
        assert_eq!(Value::from(Side::Bottom), Value::Number(0.0));
        assert_eq!(Value::from(Side::EAST), Value::Number(5.0));
        assert_eq!(Side::from_repr(3), Some(Side::Front));
        assert_eq!(Side::from_repr(6), None);
    }
}
