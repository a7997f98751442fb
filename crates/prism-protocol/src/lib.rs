//! Wire protocol for the hostname registration service: message types,
//! the length-prefixed frame codec, and message validation.

pub mod codec;
pub mod message;
pub mod validate;

pub use codec::{encode, DecodeOutcome, FrameCodec, FrameError};
pub use message::{RegisterMessage, ResponseMessage, ResponseStatus, PROTOCOL_VERSION};
pub use validate::{
    sanitize_hostname, validate_register, validate_register_message, ValidatedRegistration,
    ValidationError, RESERVED_HOSTNAMES,
};
