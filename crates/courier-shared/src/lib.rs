//! Types shared by every Courier crate: identifiers, message model enums,
//! the JSON wire protocol and its errors.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{Frame, RawFrame};
