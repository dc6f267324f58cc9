pub mod event;
pub mod heartbeat;

pub use event::{latest_event, parse_event_children, DoorbellEvent, KeyedEvent};
pub use heartbeat::{DeviceStatus, HeartbeatRecord};
