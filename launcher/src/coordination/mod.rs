//! Cross-thread coordination between the install worker and the rendering thread.

pub mod dispatch;
pub mod gate;

pub use dispatch::{ui_channel, DispatchError, RenderHost, UiDispatcher, UiTaskQueue};
pub use gate::{AckGate, GateError};
