//! Realtime duplex path
//!
//! Live microphone audio goes to a remote realtime API over a WebSocket and
//! its audio replies play as they arrive. Server-side speech detection
//! cancels whatever is playing.

mod handler;
mod protocol;
mod session;

pub use handler::{DeltaPlayer, Step, handle_event};
pub use protocol::{ErrorDetail, RealtimeEvent, SessionSettings, TurnDetection};
pub use session::RealtimeSession;
