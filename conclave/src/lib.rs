//! Core types and traits for multi-party mesh calls.
//!
//! A call session is built from three external collaborators, each behind a trait:
//! a [`signaling::SignalingChannel`] that relays room messages, a [`transport::PeerTransport`]
//! that establishes peer links and a [`media::MediaDevices`] that hands out capture streams.
//! The orchestration lives in an implementation of [`session::Session`].

pub mod error;
pub mod id;
pub mod media;
pub mod session;
pub mod signaling;
pub mod transport;

pub use error::Error;
pub use id::{PeerId, RoomId};
