//! The tagged, self-delimiting text format spoken between the controller and
//! its agents.
//!
//! Every value is a prefix byte followed by a payload:
//!
//! | tag | value |
//! |-----|-------|
//! | `!` | null |
//! | `#<decimal>@` | number (f64, textual decimal) |
//! | `@<body>@~` | string; a literal `@` in the body is escaped as `@.` |
//! | `+` / `-` | boolean true / false |
//! | `=<key><value>…!` | table, terminated by a null where a key would go |
//!
//! There is no framing beyond the grammar itself; [`Decoder`] is push-driven
//! and may be fed chunks of any size, including splits in the middle of a
//! number, a string, or an escape sequence. [`WireCodec`] adapts the pair to
//! [`tokio_util::codec`] for use with framed sockets.

mod codec;
mod decode;
mod encode;
mod error;
mod value;

pub use codec::WireCodec;
pub use decode::Decoder;
pub use encode::{encode, encode_to_string};
pub use error::{DecodeError, WireError};
pub use value::{array_to_table, table_to_array, Key, Table, Value};
