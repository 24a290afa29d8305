//! Launcher events.
//!
//! The worker publishes these on the [`bus::EventBus`]; presentation surfaces subscribe.
//! Topic names match what the log files and older adapters expect:
//! `"log"`, `"state-change"` and `"exit"`.

pub mod bus;

pub use bus::{EventBus, SubscriptionId};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Log,
    StateChange,
    Exit,
}

impl EventTopic {
    pub const ALL: [EventTopic; 3] = [EventTopic::Log, EventTopic::StateChange, EventTopic::Exit];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::Log => "log",
            EventTopic::StateChange => "state-change",
            EventTopic::Exit => "exit",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification on the bus.
///
/// `StateChange` and `Exit` carry no payload: subscribers re-read the model snapshot
/// instead of trusting anything captured at publish time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherEvent {
    /// Raw bytes of one log write, unmodified.
    Log(Vec<u8>),
    StateChange,
    Exit,
}

impl LauncherEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            LauncherEvent::Log(_) => EventTopic::Log,
            LauncherEvent::StateChange => EventTopic::StateChange,
            LauncherEvent::Exit => EventTopic::Exit,
        }
    }
}
