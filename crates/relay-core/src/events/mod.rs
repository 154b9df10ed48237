mod hub;
mod json_sink;
mod types;

pub use hub::{EventHub, EventSink};
pub use json_sink::JsonLineSink;
pub use types::{ChannelStatusEvent, Event, SweepEvent, TransitionCause};
