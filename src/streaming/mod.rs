//! Streaming answers as typed frames over Server-Sent Events.
//!
//! A [`StreamFramer`] runs a query on a background task and hands back a
//! [`FrameStream`]. Every stream opens with `start` and ends with exactly one
//! of `end` or `error`:
//!
//! ```text
//! data: {"type":"start","data":{...}}
//! data: {"type":"metadata","data":{...}}
//! data: {"type":"content","data":{"content":"..."}}
//! data: {"type":"end","data":{"latencyMs":812,"tokensUsed":{...}}}
//! ```

mod frame;
mod framer;
mod sse;

pub use frame::{
    ContentData, EndData, MetadataData, StartData, StreamFrame, DEGRADED_HINT,
};
pub use framer::{FrameStream, SseStream, StreamFramer, DEFAULT_CHANNEL_CAPACITY};
pub use sse::{decode_frames, FrameDecoder, SseEvent, SseParser};
