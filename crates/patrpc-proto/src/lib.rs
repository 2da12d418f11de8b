//! # patrpc-proto
//!
//! Protocol definitions for the patrpc message-pattern transport.
//!
//! Every application message travels as a single frame:
//!
//! ```text
//! <decimal-length>#<json body of exactly that many bytes>
//! ```
//!
//! There is no delimiter after the body; the next frame's length prefix starts
//! immediately. Requests name a *pattern* (`{"cmd": "..."}`) that the server
//! routes to a registered handler, and responses follow the microservice
//! transport convention of `response` / `err` / `isDisposed` fields.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{Frame, FrameCodec, DEFAULT_MAX_FRAME_LEN, MAX_PREFIX_LEN};
pub use error::{CodecError, ProtoError, ProtoResult};
pub use messages::{
    Pattern, Request, Response, ResponseStatus, HEARTBEAT_PAYLOAD, PING_COMMAND, PONG_PAYLOAD,
};
