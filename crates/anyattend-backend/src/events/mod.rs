//! Device event log and owner notifications.

pub mod log;
pub mod sink;

pub use log::{DeviceEventType, EventLog, MAX_EVENT_PAGE};
pub use sink::{EventSink, LogSink, NotificationError, OwnerNotification};
