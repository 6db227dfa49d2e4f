//! In-memory implementations of the session collaborators.
//!
//! Every implementation records what the session asked of it and lets a caller script
//! failures and inject events, which makes them suitable for driving a session without
//! a relay, a peer broker or capture hardware.

mod devices;
mod gate;
mod signaling;
mod transport;

pub use devices::{
    CaptureRecord, MemoryDevices, CAMERA_LABEL, MICROPHONE_LABEL, SCREEN_AUDIO_LABEL,
    SCREEN_LABEL,
};
pub use gate::Gate;
pub use signaling::MemorySignaling;
pub use transport::{LinkOp, MemoryLink, MemoryTransport};
