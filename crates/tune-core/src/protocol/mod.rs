//! Control-channel protocol.
//!
//! Three query kinds (set, get, info) and one event kind (set, no reply)
//! travel as [`Envelope`]s. The protocol is pure encode/decode; how an
//! envelope physically reaches its handler is the business of a
//! [`ControlChannel`](crate::channel::ControlChannel).

pub mod envelope;
pub mod event;
pub mod query;

pub use envelope::{CorrelationId, Direction, Envelope, Field, QueryKind};
pub use event::{ControlEvent, FlushListener, FlushSignal, FLUSH_TAG};
pub use query::{
    decode_control_info, decode_control_info_extended, decode_get_control, decode_set_control,
    encode_control_info, encode_get_control, encode_set_control, is_extended, is_flushing,
    mark_flushing, ControlInfoQuery, ControlReply, ControlRequest, DecodeProfile,
    GetControlQuery, SetControlQuery,
};
