//! Type marshaling between wire values, [`Value`](crate::value::Value)s and
//! caller C buffers

mod convert;
mod decode;
mod encode;
mod param;
pub mod text;

pub use decode::decode;
pub use encode::{encode, resolve_c_type, Encoded};
pub use param::{drops_fraction, read_parameter, to_wire};
